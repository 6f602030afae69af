//! Persistence layer.
//!
//! A single cloneable [`Database`] handle wraps the connection pool; query
//! methods are grouped by concern in the submodules, all as `impl Database`
//! blocks. Queries return fully materialized rows; anything that would
//! otherwise become an N+1 (timeline stats, follower inbox sets) is a
//! single aggregated query.

pub mod activities;
pub mod analytics;
pub mod federation;
pub mod heatmap;
pub mod imports;
pub mod social;
pub mod timeline;
pub mod users;

use sqlx::PgPool;

pub use activities::NewActivity;
pub use analytics::{PeriodTotals, TrainingActivity, UserTotals};
pub use social::DeliveryTarget;
pub use timeline::{LocalTimelineActivity, TimelineEntry, merge_timelines};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    /// Origin under which local actor URIs are minted; follow edges store
    /// full URIs, so queries against local users need it.
    base_url: String,
}

impl Database {
    pub fn new(pool: PgPool, base_url: impl Into<String>) -> Self {
        Self {
            pool,
            base_url: base_url.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn local_actor_uri(&self, username: &str) -> String {
        format!("{}/users/{username}", self.base_url)
    }
}
