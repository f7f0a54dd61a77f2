use super::{RpcError, RpcManager};
use crate::config::{
    PROFILE_FETCH_TIMEOUT, RECORD_FETCH_TIMEOUT, REPO_FETCH_TIMEOUT, THREAD_FETCH_DEPTH,
    THREAD_FETCH_PARENT_HEIGHT, THREAD_VIEW_TIMEOUT,
};
use pinakes_lexicon::app::bsky::actor::ProfileViewDetailed;
use pinakes_lexicon::app::bsky::feed::GetPostThreadOutput;
use pinakes_lexicon::com::atproto::identity::ResolveHandleOutput;
use pinakes_lexicon::com::atproto::repo::Record;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct XrpcErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RpcError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let ratelimit_reset = response
        .headers()
        .get("ratelimit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<XrpcErrorBody>(&body).ok();
    let error_name = parsed
        .as_ref()
        .and_then(|b| b.error.clone())
        .unwrap_or_default();
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.clone());

    if status == reqwest::StatusCode::NOT_FOUND || error_name.contains("NotFound") {
        return Err(RpcError::NotFound(message));
    }
    Err(RpcError::Status {
        status: status.as_u16(),
        message: format!("{error_name}: {message}"),
        ratelimit_reset,
    })
}

pub async fn xrpc_get<T: DeserializeOwned>(
    http: reqwest::Client,
    base: &str,
    nsid: &str,
    params: &[(&str, String)],
    timeout: Duration,
) -> Result<T, RpcError> {
    let response = http
        .get(format!("{base}/xrpc/{nsid}"))
        .query(params)
        .timeout(timeout)
        .send()
        .await
        .map_err(RpcError::from)?;
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

pub async fn xrpc_get_bytes(
    http: reqwest::Client,
    base: &str,
    nsid: &str,
    params: &[(&str, String)],
    timeout: Duration,
) -> Result<Vec<u8>, RpcError> {
    let response = http
        .get(format!("{base}/xrpc/{nsid}"))
        .query(params)
        .timeout(timeout)
        .send()
        .await
        .map_err(RpcError::from)?;
    let response = check_status(response).await?;
    Ok(response.bytes().await.map_err(RpcError::from)?.to_vec())
}

impl RpcManager {
    /// `com.atproto.sync.getRepo` against the repo's own PDS.
    pub async fn get_repo(&self, did: &str) -> Result<Vec<u8>, RpcError> {
        let did_param = did.to_string();
        self.query_by_did(did, move |http, base| {
            let did = did_param.clone();
            async move {
                xrpc_get_bytes(
                    http,
                    &base,
                    "com.atproto.sync.getRepo",
                    &[("did", did)],
                    REPO_FETCH_TIMEOUT,
                )
                .await
            }
        })
        .await
    }

    /// `com.atproto.repo.getRecord` against the record owner's PDS.
    pub async fn get_record(
        &self,
        did: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<Record, RpcError> {
        let repo = did.to_string();
        let collection = collection.to_string();
        let rkey = rkey.to_string();
        self.query_by_did(did, move |http, base| {
            let params = [
                ("repo", repo.clone()),
                ("collection", collection.clone()),
                ("rkey", rkey.clone()),
            ];
            async move {
                xrpc_get(
                    http,
                    &base,
                    "com.atproto.repo.getRecord",
                    &params,
                    RECORD_FETCH_TIMEOUT,
                )
                .await
            }
        })
        .await
    }

    /// `app.bsky.feed.getPostThread` against the appview. No retries: the
    /// backfill engine falls back to a direct record fetch on failure.
    pub async fn get_post_thread(
        &self,
        appview: &str,
        uri: &str,
    ) -> Result<GetPostThreadOutput, RpcError> {
        let uri = uri.to_string();
        self.query_no_retry(appview, move |http, base| {
            let params = [
                ("uri", uri.clone()),
                ("depth", THREAD_FETCH_DEPTH.to_string()),
                ("parentHeight", THREAD_FETCH_PARENT_HEIGHT.to_string()),
            ];
            async move {
                xrpc_get(
                    http,
                    &base,
                    "app.bsky.feed.getPostThread",
                    &params,
                    THREAD_VIEW_TIMEOUT,
                )
                .await
            }
        })
        .await
    }

    /// `app.bsky.actor.getProfile` against the appview.
    pub async fn get_profile(
        &self,
        appview: &str,
        actor: &str,
    ) -> Result<ProfileViewDetailed, RpcError> {
        let actor = actor.to_string();
        self.query(appview, move |http, base| {
            let params = [("actor", actor.clone())];
            async move {
                xrpc_get(
                    http,
                    &base,
                    "app.bsky.actor.getProfile",
                    &params,
                    PROFILE_FETCH_TIMEOUT,
                )
                .await
            }
        })
        .await
    }

    /// `com.atproto.identity.resolveHandle` against the appview.
    pub async fn resolve_handle(&self, appview: &str, handle: &str) -> Result<String, RpcError> {
        let handle = handle.to_string();
        let output: ResolveHandleOutput = self
            .query(appview, move |http, base| {
                let params = [("handle", handle.clone())];
                async move {
                    xrpc_get(
                        http,
                        &base,
                        "com.atproto.identity.resolveHandle",
                        &params,
                        PROFILE_FETCH_TIMEOUT,
                    )
                    .await
                }
            })
            .await?;
        Ok(output.did)
    }
}
