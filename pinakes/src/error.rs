use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinakesError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("rpc error: {0}")]
    Rpc(#[from] crate::rpc::RpcError),
    #[error("repo error: {0}")]
    Repo(#[from] pinakes_repo::error::RepoError),
    #[error("identity error: {0}")]
    Identity(#[from] pinakes_identity::IdentityError),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("invalid at-uri: `{0}`")]
    InvalidUri(String),
    #[error("malformed record at {0}: {1}")]
    MalformedRecord(String, String),
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    Other(String),
}
