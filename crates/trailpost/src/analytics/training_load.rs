//! Training load: per-day TSS with rolling acute/chronic means.
//!
//! TSS = duration_hours x intensity x 100, where intensity is the speed
//! ratio against a 3 m/s reference, scaled up by vertical meters per
//! horizontal meter and capped at 1. ATL is the 7-day mean, CTL the
//! 28-day mean, TSB their difference.

use std::collections::HashMap;

use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{FormStatus, TrainingLoad};
use crate::store::{Database, TrainingActivity};

pub const ATL_WINDOW_DAYS: i64 = 7;
pub const CTL_WINDOW_DAYS: i64 = 28;

/// Reference speed: 3 m/s sustained counts as full intensity.
const REFERENCE_SPEED_MPS: f64 = 3.0;

pub fn session_tss(
    duration_seconds: i64,
    distance_m: f64,
    elevation_gain_m: f64,
    average_speed_mps: Option<f64>,
) -> f64 {
    if duration_seconds <= 0 {
        return 0.0;
    }
    let speed = average_speed_mps
        .filter(|s| *s > 0.0)
        .unwrap_or_else(|| distance_m / duration_seconds as f64);

    let climb_factor = if distance_m > 0.0 {
        1.0 + elevation_gain_m / distance_m
    } else {
        1.0
    };
    let intensity = ((speed / REFERENCE_SPEED_MPS) * climb_factor).min(1.0);
    (duration_seconds as f64 / 3600.0) * intensity * 100.0
}

pub fn day_tss(activities: &[TrainingActivity]) -> f64 {
    activities
        .iter()
        .map(|a| {
            session_tss(
                a.total_duration_seconds,
                a.total_distance,
                a.elevation_gain.unwrap_or(0.0),
                a.average_speed,
            )
        })
        .sum()
}

/// Mean TSS over the `window` days ending at `day`; days without training
/// count as zero.
pub fn rolling_mean(tss_by_day: &HashMap<Date, f64>, day: Date, window: i64) -> f64 {
    let mut sum = 0.0;
    for offset in 0..window {
        if let Some(tss) = tss_by_day.get(&(day - Duration::days(offset))) {
            sum += tss;
        }
    }
    sum / window as f64
}

/// Recompute the training load for `day` and the following days it still
/// influences (the CTL window), bounded by today.
pub async fn update_training_load(
    db: &Database,
    user_id: Uuid,
    day: Date,
) -> Result<(), AppError> {
    let activities = db.training_activities_on_day(user_id, day).await?;
    let tss = day_tss(&activities);

    let today = OffsetDateTime::now_utc().date();
    let recompute_until = (day + Duration::days(CTL_WINDOW_DAYS)).min(today);

    // every stored day that can contribute to the windows we recompute
    let range_start = day - Duration::days(CTL_WINDOW_DAYS);
    let mut tss_by_day: HashMap<Date, f64> = db
        .training_load_range(user_id, range_start, recompute_until)
        .await?
        .into_iter()
        .map(|row| (row.day, row.tss))
        .collect();
    tss_by_day.insert(day, tss);

    let mut current = day;
    while current <= recompute_until {
        let day_value = *tss_by_day.get(&current).unwrap_or(&0.0);
        let atl = rolling_mean(&tss_by_day, current, ATL_WINDOW_DAYS);
        let ctl = rolling_mean(&tss_by_day, current, CTL_WINDOW_DAYS);
        let tsb = ctl - atl;

        // only persist days that carry any signal
        if day_value > 0.0 || atl > 0.0 || ctl > 0.0 {
            db.upsert_training_load(&TrainingLoad {
                user_id,
                day: current,
                tss: day_value,
                atl,
                ctl,
                tsb,
                form_status: FormStatus::from_tsb(tsb),
            })
            .await?;
        }
        current += Duration::days(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_session_tss_full_intensity() {
        // one hour at exactly 3 m/s on flat ground
        let tss = session_tss(3600, 10_800.0, 0.0, Some(3.0));
        assert!((tss - 100.0).abs() < 1e-9, "tss {tss}");
    }

    #[test]
    fn test_session_tss_half_intensity() {
        let tss = session_tss(3600, 5_400.0, 0.0, Some(1.5));
        assert!((tss - 50.0).abs() < 1e-9, "tss {tss}");
    }

    #[test]
    fn test_session_tss_intensity_is_capped() {
        // 6 m/s is far above reference speed; intensity stays at 1
        let tss = session_tss(1800, 10_800.0, 0.0, Some(6.0));
        assert!((tss - 50.0).abs() < 1e-9, "tss {tss}");
    }

    #[test]
    fn test_session_tss_climb_raises_intensity() {
        let flat = session_tss(3600, 7_200.0, 0.0, Some(2.0));
        let hilly = session_tss(3600, 7_200.0, 720.0, Some(2.0));
        assert!(hilly > flat);
        // 10% grade scales intensity by 1.1
        assert!((hilly / flat - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_session_tss_falls_back_to_distance_speed() {
        let explicit = session_tss(3600, 7_200.0, 0.0, Some(2.0));
        let derived = session_tss(3600, 7_200.0, 0.0, None);
        assert!((explicit - derived).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_mean_and_tsb() {
        let mut tss = HashMap::new();
        // a steady 70 TSS per day for four weeks
        for offset in 0..CTL_WINDOW_DAYS {
            tss.insert(date!(2025 - 11 - 27) - Duration::days(offset), 70.0);
        }
        let atl = rolling_mean(&tss, date!(2025 - 11 - 27), ATL_WINDOW_DAYS);
        let ctl = rolling_mean(&tss, date!(2025 - 11 - 27), CTL_WINDOW_DAYS);
        assert!((atl - 70.0).abs() < 1e-9);
        assert!((ctl - 70.0).abs() < 1e-9);
        assert_eq!(FormStatus::from_tsb(ctl - atl), FormStatus::Optimal);
    }

    #[test]
    fn test_rest_week_turns_fresh() {
        let mut tss = HashMap::new();
        // training for three weeks, then a full week off
        for offset in 7..CTL_WINDOW_DAYS {
            tss.insert(date!(2025 - 11 - 27) - Duration::days(offset), 100.0);
        }
        let atl = rolling_mean(&tss, date!(2025 - 11 - 27), ATL_WINDOW_DAYS);
        let ctl = rolling_mean(&tss, date!(2025 - 11 - 27), CTL_WINDOW_DAYS);
        assert_eq!(atl, 0.0);
        assert!(ctl > 5.0);
        assert_eq!(FormStatus::from_tsb(ctl - atl), FormStatus::Fresh);
    }
}
