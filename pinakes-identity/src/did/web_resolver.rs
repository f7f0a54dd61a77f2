use crate::errors::IdentityError;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const DOC_PATH: &str = "/.well-known/did.json";

#[derive(Clone, Debug)]
pub struct DidWebResolver {
    pub timeout: Duration,
}

impl DidWebResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn resolve_no_check(&self, did: &str) -> Result<Option<Value>, IdentityError> {
        let parts = did.split(':').skip(2).collect::<Vec<&str>>();
        let host = match parts.as_slice() {
            [] => return Err(IdentityError::PoorlyFormattedDid(did.to_string())),
            [host] => *host,
            // atproto does not support did:web with a path component
            _ => return Err(IdentityError::UnsupportedDidWebPath(did.to_string())),
        };

        let mut url = Url::parse(&format!("https://{host}{DOC_PATH}"))
            .map_err(|_| IdentityError::PoorlyFormattedDid(did.to_string()))?;
        if url.host_str() == Some("localhost") {
            let _ = url.set_scheme("http");
        }

        let client = reqwest::Client::new();
        let response = client
            .get(url.to_string())
            .timeout(self.timeout)
            .send()
            .await?;
        match response.error_for_status_ref() {
            Ok(_) => Ok(Some(response.json::<Value>().await?)),
            Err(error) if error.status() == Some(reqwest::StatusCode::NOT_FOUND) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}
