//! Analytics derivers: personal records, achievements, training load and
//! period summaries.
//!
//! Each deriver is a free async function over `(db, activity_id)` or
//! `(db, user_id, day)` that owns its own queries; pipeline stages call
//! them in isolated tasks, the batch importer re-runs them per imported
//! activity after the archive finishes.

pub mod achievements;
pub mod records;
pub mod summaries;
pub mod training_load;
