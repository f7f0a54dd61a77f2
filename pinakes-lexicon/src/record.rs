use crate::app::bsky::feed::like::Like;
use crate::app::bsky::feed::{Post, Repost};
use crate::app::bsky::graph::Follow;

pub const POST_COLLECTION: &str = "app.bsky.feed.post";
pub const REPOST_COLLECTION: &str = "app.bsky.feed.repost";
pub const LIKE_COLLECTION: &str = "app.bsky.feed.like";
pub const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";

/// The record shapes the indexer understands, keyed by the `$type`
/// discriminator carried in every atproto record. Deserializing through this
/// enum is the schema validation step: a record whose shape does not match
/// its declared type surfaces as a serde error.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum KnownRecord {
    #[serde(rename = "app.bsky.feed.post")]
    Post(Post),
    #[serde(rename = "app.bsky.feed.repost")]
    Repost(Repost),
    #[serde(rename = "app.bsky.feed.like")]
    Like(Like),
    #[serde(rename = "app.bsky.graph.follow")]
    Follow(Follow),
}

impl KnownRecord {
    /// Whether `collection` names a record type this enum can decode.
    pub fn is_known_collection(collection: &str) -> bool {
        matches!(
            collection,
            POST_COLLECTION | REPOST_COLLECTION | LIKE_COLLECTION | FOLLOW_COLLECTION
        )
    }
}
