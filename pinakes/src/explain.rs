use crate::error::PinakesError;
use crate::store::Store;
use crate::uri::AtUri;
use std::collections::HashSet;
use std::fmt::Write;

/// Render the chain of inclusion reasons that put `uri` in the index, one
/// indented line per hop. Cycles through quoted posts are labelled rather
/// than followed.
pub fn explain(store: &Store, uri: &str) -> Result<String, PinakesError> {
    let mut out = String::new();
    let mut visited = HashSet::new();
    walk(store, uri, 0, &mut visited, &mut out)?;
    Ok(out)
}

fn walk(
    store: &Store,
    uri: &str,
    depth: usize,
    visited: &mut HashSet<String>,
    out: &mut String,
) -> Result<(), PinakesError> {
    let indent = "  ".repeat(depth);
    if !visited.insert(uri.to_string()) {
        let _ = writeln!(out, "{indent}{uri} (cycle)");
        return Ok(());
    }

    let parsed = AtUri::parse(uri)?;
    let Some(post) = store.get_post(&parsed.did, &parsed.rkey)? else {
        let _ = writeln!(out, "{indent}{uri} (not in index)");
        return Ok(());
    };

    let _ = writeln!(out, "{indent}{uri} [{}]", post.inclusion_reason);
    if let Some(context) = post.inclusion_context {
        if context.starts_with("at://") {
            walk(store, &context, depth + 1, visited, out)?;
        } else {
            let _ = writeln!(out, "{}  via {context}", indent);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PostRow;
    use tempfile::TempDir;

    fn row(rkey: &str, reason: &str, context: Option<&str>) -> PostRow {
        PostRow {
            creator: "did:plc:alice".to_string(),
            rkey: rkey.to_string(),
            created_at: 0,
            text: String::new(),
            embedding: None,
            alt_text: None,
            alt_text_embedding: None,
            reply_parent: None,
            reply_root: None,
            quoted: None,
            embed_title: None,
            embed_description: None,
            embed_url: None,
            inclusion_reason: reason.to_string(),
            inclusion_context: context.map(str::to_string),
        }
    }

    fn uri(rkey: &str) -> String {
        format!("at://did:plc:alice/app.bsky.feed.post/{rkey}")
    }

    #[test]
    fn follows_the_inclusion_chain() {
        let dir = TempDir::with_prefix("pinakes_explain_test_").unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        store
            .insert_posts(&[
                row("3lk4aaaaaaa2a", "descendant_of", Some(&uri("3lk4rrrrrrr2r"))),
                row("3lk4rrrrrrr2r", "self", None),
            ])
            .unwrap();

        let tree = explain(&store, &uri("3lk4aaaaaaa2a")).unwrap();
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("descendant_of"));
        assert!(lines[1].starts_with("  "));
        assert!(lines[1].contains("[self]"));
    }

    #[test]
    fn reposter_context_prints_as_leaf() {
        let dir = TempDir::with_prefix("pinakes_explain_test_").unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        store
            .insert_posts(&[row("3lk4aaaaaaa2a", "reposted_by", Some("did:plc:bob"))])
            .unwrap();

        let tree = explain(&store, &uri("3lk4aaaaaaa2a")).unwrap();
        assert!(tree.contains("via did:plc:bob"));
    }

    #[test]
    fn cycles_are_labelled() {
        let dir = TempDir::with_prefix("pinakes_explain_test_").unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        store
            .insert_posts(&[
                row("3lk4aaaaaaa2a", "quoted_by", Some(&uri("3lk4bbbbbbb2b"))),
                row("3lk4bbbbbbb2b", "quoted_by", Some(&uri("3lk4aaaaaaa2a"))),
            ])
            .unwrap();

        let tree = explain(&store, &uri("3lk4aaaaaaa2a")).unwrap();
        assert!(tree.contains("(cycle)"));
        // the walk terminated
        assert_eq!(tree.lines().count(), 3);
    }

    #[test]
    fn missing_posts_are_reported() {
        let dir = TempDir::with_prefix("pinakes_explain_test_").unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        let tree = explain(&store, &uri("3lk4aaaaaaa2a")).unwrap();
        assert!(tree.contains("(not in index)"));
    }
}
