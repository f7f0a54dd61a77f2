use crate::error::PinakesError;
use std::fmt;

/// A canonical `at://<did>/<collection>/<rkey>` resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn new(did: &str, collection: &str, rkey: &str) -> Self {
        Self {
            did: did.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self, PinakesError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| PinakesError::InvalidUri(uri.to_string()))?;
        let mut parts = rest.splitn(3, '/');
        let (did, collection, rkey) = match (parts.next(), parts.next(), parts.next()) {
            (Some(did), Some(collection), Some(rkey))
                if !did.is_empty() && !collection.is_empty() && !rkey.is_empty() =>
            {
                (did, collection, rkey)
            }
            _ => return Err(PinakesError::InvalidUri(uri.to_string())),
        };
        if !did.starts_with("did:") {
            return Err(PinakesError::InvalidUri(uri.to_string()));
        }
        Ok(Self::new(did, collection, rkey))
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

const TID_LEN: usize = 13;
const TID_ALPHABET: &str = "234567abcdefghijklmnopqrstuvwxyz";

/// Whether `s` is a timestamp identifier, the base32-sortable record key
/// format whose lexicographic order tracks creation order.
pub fn is_tid(s: &str) -> bool {
    s.len() == TID_LEN && s.chars().all(|c| TID_ALPHABET.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_uri() {
        let uri = AtUri::parse("at://did:plc:abc123/app.bsky.feed.post/3lk4abcdefg2x").unwrap();
        assert_eq!(uri.did, "did:plc:abc123");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3lk4abcdefg2x");
        assert_eq!(
            uri.to_string(),
            "at://did:plc:abc123/app.bsky.feed.post/3lk4abcdefg2x"
        );
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(AtUri::parse("https://bsky.app/profile/x").is_err());
        assert!(AtUri::parse("at://did:plc:abc123/app.bsky.feed.post").is_err());
        assert!(AtUri::parse("at://not-a-did/app.bsky.feed.post/rkey").is_err());
        assert!(AtUri::parse("at:///app.bsky.feed.post/rkey").is_err());
    }

    #[test]
    fn tid_detection() {
        assert!(is_tid("3lk4abcdefg2x"));
        assert!(!is_tid("3lk4abcdefg2"));
        assert!(!is_tid("3LK4ABCDEFG2X"));
        assert!(!is_tid("self"));
        assert!(!is_tid("3lk4abcdefg21")); // '1' is not in the alphabet
    }
}
