/// com.atproto.identity.resolveHandle output.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResolveHandleOutput {
    pub did: String,
}
