use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("poorly formatted did: `{0}`")]
    PoorlyFormattedDid(String),
    #[error("unsupported did method: `{0}`")]
    UnsupportedDidMethod(String),
    #[error("unsupported did:web path: `{0}`")]
    UnsupportedDidWebPath(String),
    #[error("poorly formatted did document for `{0}`")]
    PoorlyFormattedDidDocument(String),
    #[error("invalid service endpoint in did document for `{0}`")]
    InvalidServiceEndpoint(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
