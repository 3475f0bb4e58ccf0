pub mod client;
pub mod types;

pub use client::{HttpTrackerClient, IssueSource};
pub use types::{ChangelogEvent, ChangelogValue, EntityRef, FieldChange, Issue};
