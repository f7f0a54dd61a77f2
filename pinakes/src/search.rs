use crate::embedder::Embedder;
use crate::error::PinakesError;
use crate::rpc::RpcManager;
use crate::store::{PostRow, SearchOptions, Store};

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub post: PostRow,
    /// Cosine distance for vector searches; absent for substring matches.
    pub distance: Option<f64>,
}

/// Identifier inputs accept either a DID or a handle; handles resolve once
/// and are substituted with their DID.
pub async fn resolve_actor(
    rpc: &RpcManager,
    appview: &str,
    identifier: &str,
) -> Result<String, PinakesError> {
    if identifier.starts_with("did:") {
        return Ok(identifier.to_string());
    }
    Ok(rpc.resolve_handle(appview, identifier).await?)
}

async fn resolve_actors(
    rpc: &RpcManager,
    appview: &str,
    identifiers: &[String],
) -> Result<Vec<String>, PinakesError> {
    let mut resolved = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        resolved.push(resolve_actor(rpc, appview, identifier).await?);
    }
    Ok(resolved)
}

pub async fn search_posts(
    store: &Store,
    rpc: &RpcManager,
    embedder: &Embedder,
    appview: &str,
    query: &str,
    vector: bool,
    mut opts: SearchOptions,
) -> Result<Vec<SearchHit>, PinakesError> {
    opts.creators = resolve_actors(rpc, appview, &opts.creators).await?;
    opts.parent_authors = resolve_actors(rpc, appview, &opts.parent_authors).await?;
    opts.root_authors = resolve_actors(rpc, appview, &opts.root_authors).await?;

    if vector {
        let query_vec = embedder
            .embed_batch(vec![query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| PinakesError::Embedding("no vector for query".to_string()))?;
        let hits = store.search_posts_vector(&query_vec, &opts)?;
        Ok(hits
            .into_iter()
            .map(|(post, distance)| SearchHit {
                post,
                distance: Some(distance),
            })
            .collect())
    } else {
        Ok(store
            .search_posts_text(Some(query), &opts)?
            .into_iter()
            .map(|post| SearchHit {
                post,
                distance: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PLC_URL;

    #[tokio::test]
    async fn dids_pass_through_without_resolution() {
        let rpc = RpcManager::new(PLC_URL.clone());
        // an unreachable appview proves no network round-trip happens
        let did = resolve_actor(&rpc, "http://127.0.0.1:9", "did:plc:abc123")
            .await
            .unwrap();
        assert_eq!(did, "did:plc:abc123");
    }
}
