use crate::error::RepoError;
use crate::BlockMap;
use lexicon_cid::Cid;
use serde::Deserialize;

/// On-disk MST node: an optional leftmost subtree plus a run of entries with
/// prefix-compressed keys.
#[derive(Debug, Deserialize)]
struct NodeData {
    l: Option<Cid>,
    e: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    /// Count of bytes shared with the previous key in this node.
    p: usize,
    /// Remainder of the key after the shared prefix.
    #[serde(with = "serde_bytes")]
    k: Vec<u8>,
    /// Leaf value.
    v: Cid,
    /// Subtree between this leaf and the next.
    t: Option<Cid>,
}

fn read_node(blocks: &BlockMap, cid: &Cid) -> Result<NodeData, RepoError> {
    let bytes = blocks
        .get(cid)
        .ok_or_else(|| RepoError::MissingBlock(cid.to_string()))?;
    serde_ipld_dagcbor::from_slice::<NodeData>(bytes)
        .map_err(|e| RepoError::NodeDecode(cid.to_string(), e.to_string()))
}

/// Walk the MST rooted at `root`, collecting `(key, cid)` leaves in key
/// order. Keys have the form `<collection>/<rkey>`.
pub fn walk_mst_entries(blocks: &BlockMap, root: &Cid) -> Result<Vec<(String, Cid)>, RepoError> {
    let mut out = Vec::new();
    walk(blocks, root, String::new(), &mut out)?;
    Ok(out)
}

fn walk(
    blocks: &BlockMap,
    node_cid: &Cid,
    mut last_key: String,
    out: &mut Vec<(String, Cid)>,
) -> Result<(), RepoError> {
    let node = read_node(blocks, node_cid)?;

    if let Some(left) = &node.l {
        walk(blocks, left, last_key.clone(), out)?;
    }

    for entry in &node.e {
        if entry.p > last_key.len() {
            return Err(RepoError::InvalidKey(format!(
                "prefix length {} exceeds previous key `{last_key}`",
                entry.p
            )));
        }
        let partial = std::str::from_utf8(&entry.k)
            .map_err(|_| RepoError::InvalidKey(format!("non-utf8 key in node {node_cid}")))?;
        let key = format!("{}{}", &last_key[..entry.p], partial);

        out.push((key.clone(), entry.v));

        if let Some(right) = &entry.t {
            walk(blocks, right, key.clone(), out)?;
        }

        last_key = key;
    }

    Ok(())
}
