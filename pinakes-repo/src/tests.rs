#[cfg(test)]
mod repo_tests {
    use crate::{decode_repo, error::RepoError};
    use iroh_car::{CarHeader, CarWriter};
    use lexicon_cid::Cid;
    use multihash::Multihash;
    use serde::Serialize;
    use sha2::{Digest, Sha256};

    const SHA2_256: u64 = 0x12;
    const DAGCBOR_CODEC: u64 = 0x71;

    fn cid_for_cbor<T: Serialize>(data: &T) -> (Cid, Vec<u8>) {
        let bytes = serde_ipld_dagcbor::to_vec(data).unwrap();
        let mut sha = Sha256::new();
        sha.update(&bytes);
        let hash = sha.finalize();
        let cid = Cid::new_v1(
            DAGCBOR_CODEC,
            Multihash::<64>::wrap(SHA2_256, hash.as_slice()).unwrap(),
        );
        (cid, bytes)
    }

    #[derive(Serialize)]
    struct TestCommit {
        version: u64,
        did: String,
        data: Cid,
        rev: String,
        prev: Option<Cid>,
        #[serde(with = "serde_bytes")]
        sig: Vec<u8>,
    }

    #[derive(Serialize)]
    struct TestNode {
        l: Option<Cid>,
        e: Vec<TestEntry>,
    }

    #[derive(Serialize)]
    struct TestEntry {
        p: usize,
        #[serde(with = "serde_bytes")]
        k: Vec<u8>,
        v: Cid,
        t: Option<Cid>,
    }

    fn record(text: &str) -> serde_json::Value {
        serde_json::json!({
            "$type": "app.bsky.feed.post",
            "createdAt": "2024-11-05T01:23:45.678Z",
            "text": text,
        })
    }

    async fn write_car(roots: Vec<Cid>, blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(CarHeader::new_v1(roots), &mut buffer);
        for (cid, bytes) in blocks {
            writer.write(*cid, bytes).await.unwrap();
        }
        writer.finish().await.unwrap();
        buffer
    }

    /// A single-node repo with two post records whose MST keys share a
    /// compressed prefix.
    async fn test_repo() -> Vec<u8> {
        let (rec_a_cid, rec_a) = cid_for_cbor(&record("first"));
        let (rec_b_cid, rec_b) = cid_for_cbor(&record("second"));

        let key_a = "app.bsky.feed.post/3laaaaaaaaa2a";
        // shares "app.bsky.feed.post/3l" (21 bytes) with key_a
        let node = TestNode {
            l: None,
            e: vec![
                TestEntry {
                    p: 0,
                    k: key_a.as_bytes().to_vec(),
                    v: rec_a_cid,
                    t: None,
                },
                TestEntry {
                    p: 21,
                    k: b"bbbbbbbbb2b".to_vec(),
                    v: rec_b_cid,
                    t: None,
                },
            ],
        };
        let (node_cid, node_bytes) = cid_for_cbor(&node);

        let commit = TestCommit {
            version: 3,
            did: "did:plc:testuser".to_string(),
            data: node_cid,
            rev: "3lk4abcdefg2x".to_string(),
            prev: None,
            sig: vec![0u8; 64],
        };
        let (commit_cid, commit_bytes) = cid_for_cbor(&commit);

        write_car(
            vec![commit_cid],
            &[
                (commit_cid, commit_bytes),
                (node_cid, node_bytes),
                (rec_a_cid, rec_a),
                (rec_b_cid, rec_b),
            ],
        )
        .await
    }

    #[tokio::test]
    async fn decodes_commit_and_entries() {
        let car = test_repo().await;
        let repo = decode_repo(&car).await.unwrap();

        assert_eq!(repo.did, "did:plc:testuser");
        assert_eq!(repo.rev, "3lk4abcdefg2x");
        assert_eq!(repo.len(), 2);

        let entries: Vec<_> = repo.entries().map(|e| e.unwrap()).collect();
        assert_eq!(entries[0].collection, "app.bsky.feed.post");
        assert_eq!(entries[0].rkey, "3laaaaaaaaa2a");
        assert_eq!(entries[0].record["text"], "first");
        // prefix-compressed key reconstructs to the full rkey
        assert_eq!(entries[1].rkey, "3lbbbbbbbbb2b");
        assert_eq!(entries[1].record["text"], "second");
    }

    #[tokio::test]
    async fn rejects_multiple_roots() {
        let (cid_a, bytes_a) = cid_for_cbor(&record("a"));
        let (cid_b, bytes_b) = cid_for_cbor(&record("b"));
        let car = write_car(vec![cid_a, cid_b], &[(cid_a, bytes_a), (cid_b, bytes_b)]).await;

        match decode_repo(&car).await {
            Err(RepoError::RootCount(2)) => {}
            other => panic!("expected RootCount error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_record_block_is_a_stream_error() {
        let (rec_cid, _rec_bytes) = cid_for_cbor(&record("dropped"));
        let node = TestNode {
            l: None,
            e: vec![TestEntry {
                p: 0,
                k: b"app.bsky.feed.post/3laaaaaaaaa2a".to_vec(),
                v: rec_cid,
                t: None,
            }],
        };
        let (node_cid, node_bytes) = cid_for_cbor(&node);
        let commit = TestCommit {
            version: 3,
            did: "did:plc:testuser".to_string(),
            data: node_cid,
            rev: "3lk4abcdefg2x".to_string(),
            prev: None,
            sig: vec![0u8; 64],
        };
        let (commit_cid, commit_bytes) = cid_for_cbor(&commit);

        // record block deliberately absent
        let car = write_car(
            vec![commit_cid],
            &[(commit_cid, commit_bytes), (node_cid, node_bytes)],
        )
        .await;

        let repo = decode_repo(&car).await.unwrap();
        let results: Vec<_> = repo.entries().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(RepoError::MissingBlock(_))));
    }

    #[tokio::test]
    async fn garbage_bytes_fail_fast() {
        assert!(decode_repo(b"not a car archive").await.is_err());
    }

    #[tokio::test]
    async fn missing_mst_root_fails_the_walk() {
        let commit = TestCommit {
            version: 3,
            did: "did:plc:testuser".to_string(),
            data: cid_for_cbor(&record("phantom")).0,
            rev: "3lk4abcdefg2x".to_string(),
            prev: None,
            sig: vec![0u8; 64],
        };
        let (commit_cid, commit_bytes) = cid_for_cbor(&commit);
        let car = write_car(vec![commit_cid], &[(commit_cid, commit_bytes)]).await;

        assert!(matches!(
            decode_repo(&car).await,
            Err(RepoError::MissingBlock(_))
        ));
    }
}
