use crate::com::atproto::repo::StrongRef;

/// Reduced to the liked subject; the indexer follows what a like points at
/// and ignores the rest of the record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.feed.like")]
pub struct Like {
    pub subject: StrongRef,
}
