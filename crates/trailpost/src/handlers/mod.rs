//! HTTP handlers, grouped by concern. The ActivityPub wire endpoints live
//! in `activitypub`; everything else is the bearer-authenticated JSON API.

pub mod activities;
pub mod activitypub;
pub mod analytics;
pub mod heatmap;
pub mod imports;
pub mod privacy;
pub mod social;
pub mod timeline;
pub mod users;

pub mod pagination;

pub use activities::{
    delete_activity, download_raw_file, get_activity_geojson, get_activity_track,
    update_activity, upload_activity,
};
pub use activitypub::{
    actor_document, followers_collection, following_collection, inbox_post, nodeinfo,
    nodeinfo_document, outbox_collection, public_activity_note, webfinger,
};
pub use analytics::{
    get_achievements, get_personal_records, get_summaries, get_training_load,
};
pub use heatmap::{get_heatmap, rebuild_heatmap};
pub use imports::{get_import_status, start_import};
pub use privacy::{create_privacy_zone, delete_privacy_zone, list_privacy_zones};
pub use social::{
    add_comment, delete_comment, follow_remote, get_comments, get_notifications, like_activity,
    mark_all_notifications_read, mark_notification_read, unfollow_remote, unlike_activity,
};
pub use timeline::{federated_timeline, public_timeline};
pub use users::{delete_account, get_user_activities, health_check};
