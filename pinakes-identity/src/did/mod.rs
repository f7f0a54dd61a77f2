pub mod plc_resolver;
pub mod web_resolver;

use crate::errors::IdentityError;
use crate::types::{DidDocument, DidResolverOpts};
use plc_resolver::DidPlcResolver;
use serde_json::Value;
use std::time::Duration;
use web_resolver::DidWebResolver;

#[derive(Clone, Debug)]
pub struct DidResolver {
    plc: DidPlcResolver,
    web: DidWebResolver,
}

impl DidResolver {
    pub fn new(opts: DidResolverOpts) -> Self {
        let DidResolverOpts { timeout, plc_url } = opts;
        let timeout = timeout.unwrap_or_else(|| Duration::new(3, 0));
        let plc_url = plc_url.unwrap_or_else(|| "https://plc.directory".to_string());
        Self {
            plc: DidPlcResolver::new(plc_url, timeout),
            web: DidWebResolver::new(timeout),
        }
    }

    async fn resolve_no_check(&self, did: &str) -> Result<Option<Value>, IdentityError> {
        let split = did.split(':').collect::<Vec<&str>>();
        if split.len() < 3 || split[0] != "did" {
            return Err(IdentityError::PoorlyFormattedDid(did.to_string()));
        }
        match split[1] {
            "plc" => self.plc.resolve_no_check(did).await,
            "web" => self.web.resolve_no_check(did).await,
            _ => Err(IdentityError::UnsupportedDidMethod(did.to_string())),
        }
    }

    fn validate_did_doc(&self, did: &str, val: Value) -> Result<DidDocument, IdentityError> {
        let doc = serde_json::from_value::<DidDocument>(val)
            .map_err(|_| IdentityError::PoorlyFormattedDidDocument(did.to_string()))?;
        if doc.id != did {
            return Err(IdentityError::PoorlyFormattedDidDocument(did.to_string()));
        }
        Ok(doc)
    }

    /// Resolve a DID to its document. `Ok(None)` is a positive not-found,
    /// as opposed to a transport failure.
    pub async fn resolve(&self, did: &str) -> Result<Option<DidDocument>, IdentityError> {
        match self.resolve_no_check(did).await? {
            None => Ok(None),
            Some(got) => Ok(Some(self.validate_did_doc(did, got)?)),
        }
    }
}
