pub mod car;
pub mod commit;
pub mod error;
pub mod ipld;
pub mod mst;

mod tests;

use crate::car::read_car_with_root;
use crate::commit::Commit;
use crate::error::RepoError;
use crate::mst::walk_mst_entries;
use lexicon_cid::Cid;
use std::collections::HashMap;

/// Content-addressed block map collected from a CAR archive.
pub type BlockMap = HashMap<Cid, Vec<u8>>;

/// One record yielded while walking a decoded repository.
#[derive(Debug, Clone)]
pub struct RepoEntry {
    pub collection: String,
    pub rkey: String,
    pub cid: Cid,
    pub record: serde_json::Value,
}

/// A repository decoded from a CAR archive: the commit plus the MST leaves
/// under it. Records are CBOR-decoded lazily through [`DecodedRepo::entries`].
#[derive(Debug)]
pub struct DecodedRepo {
    pub did: String,
    pub rev: String,
    blocks: BlockMap,
    leaves: Vec<(String, Cid)>,
}

impl DecodedRepo {
    /// Number of records in the repository.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Lazily dereference and decode each MST leaf. A record whose block is
    /// missing or fails CBOR decode surfaces as an `Err` item; the iterator
    /// continues with the remaining records.
    pub fn entries(&self) -> impl Iterator<Item = Result<RepoEntry, RepoError>> + '_ {
        self.leaves.iter().map(move |(key, cid)| {
            let (collection, rkey) = key
                .split_once('/')
                .ok_or_else(|| RepoError::InvalidKey(key.clone()))?;
            let bytes = self
                .blocks
                .get(cid)
                .ok_or_else(|| RepoError::MissingBlock(cid.to_string()))?;
            let node = serde_ipld_dagcbor::from_slice::<ipld_core::ipld::Ipld>(bytes)
                .map_err(|e| RepoError::RecordDecode(cid.to_string(), e.to_string()))?;
            Ok(RepoEntry {
                collection: collection.to_string(),
                rkey: rkey.to_string(),
                cid: *cid,
                record: ipld::ipld_to_json(&node),
            })
        })
    }
}

/// Decode a repository CAR archive: parse the framing, read the root commit,
/// and walk the MST under `commit.data`. Fails fast on structural
/// malformation.
pub async fn decode_repo(bytes: &[u8]) -> Result<DecodedRepo, RepoError> {
    let car = read_car_with_root(bytes).await?;
    let commit = Commit::read(&car.blocks, &car.root)?;
    let leaves = walk_mst_entries(&car.blocks, &commit.data)?;
    Ok(DecodedRepo {
        did: commit.did,
        rev: commit.rev,
        blocks: car.blocks,
        leaves,
    })
}
