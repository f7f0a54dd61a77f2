use crate::app::bsky::actor::ProfileViewBasic;
use crate::app::bsky::embed::EmbedViews;
use crate::app::bsky::feed::BlockedAuthor;
use crate::com::atproto::repo::StrongRef;
use serde_json::Value;

/// A representation of a record embedded in a Bluesky record (eg, a post).
/// For example, a quote-post.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    pub record: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.embed.record#viewRecord")]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<EmbedViews>>,
    pub indexed_at: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.embed.record#view")]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub record: ViewUnion,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ViewUnion {
    ViewRecord(ViewRecord),
    ViewNotFound(ViewNotFound),
    ViewBlocked(ViewBlocked),
    /// Feed generators, lists and other non-post records quoted by a post;
    /// the indexer only cares that they are not post views.
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.embed.record#viewNotFound")]
#[serde(rename_all = "camelCase")]
pub struct ViewNotFound {
    pub uri: String,
    pub not_found: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.embed.record#viewBlocked")]
#[serde(rename_all = "camelCase")]
pub struct ViewBlocked {
    pub uri: String,
    pub blocked: bool,
    pub author: BlockedAuthor,
}
