use crate::app::bsky::embed::external::{External, View as ExternalView};
use crate::app::bsky::embed::images::{Images, View as ImagesView};
use crate::app::bsky::embed::record::{Record, View as RecordView};
use crate::app::bsky::embed::video::{Video, View as VideoView};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum MediaUnion {
    #[serde(rename = "app.bsky.embed.images")]
    Images(Images),
    #[serde(rename = "app.bsky.embed.video")]
    Video(Video),
    #[serde(rename = "app.bsky.embed.external")]
    External(External),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum MediaViewUnion {
    #[serde(rename = "app.bsky.embed.images#view")]
    ImagesView(ImagesView),
    #[serde(rename = "app.bsky.embed.video#view")]
    VideoView(VideoView),
    #[serde(rename = "app.bsky.embed.external#view")]
    ExternalView(ExternalView),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecordWithMedia {
    pub record: Record,
    pub media: MediaUnion,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.embed.recordWithMedia#view")]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub record: RecordView,
    pub media: MediaViewUnion,
}
