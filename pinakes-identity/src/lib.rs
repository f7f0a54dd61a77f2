pub mod did;
pub mod errors;
pub mod types;

pub use did::DidResolver;
pub use errors::IdentityError;
pub use types::{DidDocument, DidResolverOpts, Service};

/// Extract the handle from a DID document's `alsoKnownAs` aliases.
pub fn get_handle(doc: &DidDocument) -> Option<String> {
    match &doc.also_known_as {
        None => None,
        Some(aka) => aka
            .iter()
            .find(|name| name.starts_with("at://"))
            // strip off at:// prefix
            .map(|found| found[5..].to_string()),
    }
}

/// Extract the personal data server endpoint from a DID document, validating
/// that it is a well-formed http(s) URL.
pub fn get_pds_endpoint(doc: &DidDocument) -> Result<Option<String>, IdentityError> {
    let Some(services) = &doc.service else {
        return Ok(None);
    };
    for service in services {
        if service.r#type == "AtprotoPersonalDataServer" || service.id == "#atproto_pds" {
            let url = url::Url::parse(&service.service_endpoint)
                .map_err(|_| IdentityError::InvalidServiceEndpoint(doc.id.clone()))?;
            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(IdentityError::InvalidServiceEndpoint(doc.id.clone()));
            }
            return Ok(Some(service.service_endpoint.trim_end_matches('/').to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(endpoint: &str) -> DidDocument {
        DidDocument {
            context: None,
            id: "did:plc:abc".to_string(),
            also_known_as: Some(vec!["at://alice.example.com".to_string()]),
            verification_method: None,
            service: Some(vec![Service {
                id: "#atproto_pds".to_string(),
                r#type: "AtprotoPersonalDataServer".to_string(),
                service_endpoint: endpoint.to_string(),
            }]),
        }
    }

    #[test]
    fn extracts_handle_and_endpoint() {
        let doc = doc("https://pds.example.com/");
        assert_eq!(get_handle(&doc).as_deref(), Some("alice.example.com"));
        assert_eq!(
            get_pds_endpoint(&doc).unwrap().as_deref(),
            Some("https://pds.example.com")
        );
    }

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(get_pds_endpoint(&doc("not a url")).is_err());
        assert!(get_pds_endpoint(&doc("ftp://pds.example.com")).is_err());
    }

    #[test]
    fn missing_services_is_none() {
        let mut d = doc("https://pds.example.com");
        d.service = None;
        assert_eq!(get_pds_endpoint(&d).unwrap(), None);
    }
}
