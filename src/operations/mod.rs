//! Domain operations built on the pipeline engine.
//!
//! Arguments are validated here, before any pipeline runs; a pipeline never
//! sees malformed input.

mod story;
mod validation;

pub use story::{
    CreateBranch, CreateComment, CreateStory, EditComment, StoryOperations, VoteOnChapter,
};
pub use validation::{require_content, require_id};

/// Fixed-width UTC timestamp; string order matches time order.
pub fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
