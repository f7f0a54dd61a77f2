pub mod like;

use crate::app::bsky::actor::ProfileViewBasic;
use crate::app::bsky::embed::{EmbedViews, Embeds};
use crate::com::atproto::repo::StrongRef;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.feed.post")]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Client-declared timestamp when this post was originally created.
    /// Kept as the raw string so an unparseable value drops the single
    /// record instead of failing the whole decode.
    pub created_at: String,
    /// The primary post content. Might be an empty string, if there are embeds.
    pub text: String,
    /// Indicates human language of post primary text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub langs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embeds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    /// Additional hashtags, in addition to any included in post text and facets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// Reduced to the reposted subject, as with [`like::Like`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.feed.repost")]
pub struct Repost {
    pub subject: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    pub record: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<EmbedViews>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<usize>,
    pub indexed_at: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThreadViewPost {
    pub post: PostView,
    pub parent: Option<Box<ThreadViewPostEnum>>,
    pub replies: Option<Vec<Box<ThreadViewPostEnum>>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundPost {
    pub uri: String,
    pub not_found: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockedPost {
    pub uri: String,
    pub blocked: bool,
    pub author: BlockedAuthor,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockedAuthor {
    pub did: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum ThreadViewPostEnum {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    ThreadViewPost(ThreadViewPost),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFoundPost(NotFoundPost),
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    BlockedPost(BlockedPost),
}

/// app.bsky.feed.getPostThread
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GetPostThreadOutput {
    pub thread: ThreadViewPostEnum,
}
