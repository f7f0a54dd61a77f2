use crate::errors::IdentityError;
use serde_json::Value;
use std::time::Duration;
use urlencoding::encode;

#[derive(Clone, Debug)]
pub struct DidPlcResolver {
    pub plc_url: String,
    pub timeout: Duration,
}

impl DidPlcResolver {
    pub fn new(plc_url: String, timeout: Duration) -> Self {
        Self { plc_url, timeout }
    }

    pub async fn resolve_no_check(&self, did: &str) -> Result<Option<Value>, IdentityError> {
        let client = reqwest::Client::new();
        let response = client
            .get(format!("{0}/{1}", self.plc_url, encode(did)))
            .timeout(self.timeout)
            .send()
            .await?;
        match response.error_for_status_ref() {
            Ok(_) => Ok(Some(response.json::<Value>().await?)),
            // Positively not found, versus due to e.g. network error
            Err(error) if error.status() == Some(reqwest::StatusCode::NOT_FOUND) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}
