use crate::error::RepoError;
use crate::BlockMap;
use lexicon_cid::Cid;
use serde::Deserialize;

/// A signed repository commit. `data` points at the MST root and `rev` is
/// the timestamp-ordered revision of this commit.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub version: u64,
    pub did: String,
    pub data: Cid,
    pub rev: String,
    pub prev: Option<Cid>,
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
}

impl Commit {
    /// Decode the commit block referenced by the CAR root.
    pub fn read(blocks: &BlockMap, root: &Cid) -> Result<Self, RepoError> {
        let bytes = blocks
            .get(root)
            .ok_or_else(|| RepoError::MissingBlock(root.to_string()))?;
        serde_ipld_dagcbor::from_slice::<Commit>(bytes)
            .map_err(|e| RepoError::CommitDecode(e.to_string()))
    }
}
