//! Single-table key layout.
//!
//! Entity type and id are encoded in both keys: a story's children live in
//! the story's partition (`STORY#<id>` / `COMMENT#<id>`), a user's votes in
//! the user's partition. Stories are additionally projected into one listing
//! partition on the `GSI1` index.

use crate::interfaces::{IndexDefinition, ItemKey};

pub const STORY_PREFIX: &str = "STORY#";
pub const USER_PREFIX: &str = "USER#";
pub const CHAPTER_PREFIX: &str = "CHAPTER#";
pub const COMMENT_PREFIX: &str = "COMMENT#";
pub const VOTE_PREFIX: &str = "VOTE#";

/// Listing index and the attributes that project into it.
pub const LISTING_INDEX: &str = "GSI1";
pub const LISTING_PARTITION_ATTRIBUTE: &str = "GSI1PK";
pub const LISTING_SORT_ATTRIBUTE: &str = "GSI1SK";
/// Partition under which every story is listed.
pub const STORIES_PARTITION: &str = "STORIES";

pub fn story_partition(story_id: &str) -> String {
    format!("{}{}", STORY_PREFIX, story_id)
}

pub fn user_partition(user_id: &str) -> String {
    format!("{}{}", USER_PREFIX, user_id)
}

/// Story metadata item.
pub fn story(story_id: &str) -> ItemKey {
    let pk = story_partition(story_id);
    ItemKey::new(pk.clone(), pk)
}

pub fn chapter(story_id: &str, chapter_id: &str) -> ItemKey {
    ItemKey::new(
        story_partition(story_id),
        format!("{}{}", CHAPTER_PREFIX, chapter_id),
    )
}

pub fn comment(story_id: &str, comment_id: &str) -> ItemKey {
    ItemKey::new(
        story_partition(story_id),
        format!("{}{}", COMMENT_PREFIX, comment_id),
    )
}

/// Vote marker: its existence records that `user_id` voted for the chapter.
pub fn vote(user_id: &str, chapter_id: &str) -> ItemKey {
    ItemKey::new(
        user_partition(user_id),
        format!("{}{}", VOTE_PREFIX, chapter_id),
    )
}

/// Sort key inside the listing partition: newest last, ties broken by id.
pub fn listing_sort_key(created_at: &str, story_id: &str) -> String {
    format!("{}#{}", created_at, story_id)
}

pub fn listing_index() -> IndexDefinition {
    IndexDefinition::new(
        LISTING_INDEX,
        LISTING_PARTITION_ATTRIBUTE,
        LISTING_SORT_ATTRIBUTE,
    )
}
