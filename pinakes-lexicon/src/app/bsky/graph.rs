/// Social 'follow' relationship, reduced to the followed account's DID;
/// that is the only field the crawler consumes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.graph.follow")]
pub struct Follow {
    pub subject: String,
}
