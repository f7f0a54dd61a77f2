use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("car error: {0}")]
    Car(String),
    #[error("expected one root, got {0}")]
    RootCount(usize),
    #[error("car archive contains no blocks")]
    EmptyArchive,
    #[error("block not found: {0}")]
    MissingBlock(String),
    #[error("commit decode failed: {0}")]
    CommitDecode(String),
    #[error("mst node decode failed at {0}: {1}")]
    NodeDecode(String, String),
    #[error("invalid data key: {0}")]
    InvalidKey(String),
    #[error("record decode failed at {0}: {1}")]
    RecordDecode(String, String),
}
