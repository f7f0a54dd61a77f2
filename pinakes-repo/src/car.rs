use crate::error::RepoError;
use crate::BlockMap;
use iroh_car::CarReader;
use lexicon_cid::Cid;
use std::io::Cursor;

pub struct CarWithRoot {
    pub root: Cid,
    pub blocks: BlockMap,
}

/// Parse CAR framing into a content-addressed block map plus the single root
/// CID. Archives with zero or multiple roots, or with no blocks at all, are
/// structurally malformed.
pub async fn read_car_with_root(bytes: &[u8]) -> Result<CarWithRoot, RepoError> {
    let mut reader = CarReader::new(Cursor::new(bytes))
        .await
        .map_err(|e| RepoError::Car(e.to_string()))?;

    let root = {
        let roots = reader.header().roots();
        if roots.len() != 1 {
            return Err(RepoError::RootCount(roots.len()));
        }
        roots[0]
    };

    let mut blocks = BlockMap::new();
    while let Some((cid, data)) = reader
        .next_block()
        .await
        .map_err(|e| RepoError::Car(e.to_string()))?
    {
        blocks.insert(cid, data);
    }

    if blocks.is_empty() {
        return Err(RepoError::EmptyArchive);
    }

    Ok(CarWithRoot { root, blocks })
}
