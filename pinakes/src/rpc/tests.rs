#[cfg(test)]
mod rpc_tests {
    use crate::config::MAX_RETRIES;
    use crate::rpc::xrpc::xrpc_get;
    use crate::rpc::{retry_decision, RetryDecision, RpcError, RpcManager};
    use pinakes_lexicon::com::atproto::identity::ResolveHandleOutput;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn status(code: u16, reset: Option<u64>) -> RpcError {
        RpcError::Status {
            status: code,
            message: "test".into(),
            ratelimit_reset: reset,
        }
    }

    #[test]
    fn cancellation_always_surfaces() {
        let err = RpcError::Cancelled("timed out".into());
        assert_eq!(retry_decision(&err, 0), RetryDecision::Surface);
    }

    #[test]
    fn ratelimit_reset_overrides_backoff() {
        let err = status(429, Some(1_700_000_000));
        assert_eq!(
            retry_decision(&err, 0),
            RetryDecision::SleepUntil(1_700_000_000)
        );
        // the header wins even after the attempt budget is spent
        assert_eq!(
            retry_decision(&err, MAX_RETRIES + 1),
            RetryDecision::SleepUntil(1_700_000_000)
        );
    }

    #[test]
    fn retryable_statuses_back_off_exponentially() {
        for code in [408u16, 429, 500, 502, 503, 504] {
            let err = status(code, None);
            assert_eq!(
                retry_decision(&err, 0),
                RetryDecision::Backoff(Duration::from_secs(3))
            );
        }
        let err = status(503, None);
        let expected = [3u64, 9, 27, 81, 243];
        for (attempt, secs) in expected.iter().enumerate() {
            assert_eq!(
                retry_decision(&err, attempt as u32),
                RetryDecision::Backoff(Duration::from_secs(*secs))
            );
        }
        assert_eq!(retry_decision(&err, MAX_RETRIES), RetryDecision::Surface);
    }

    #[test]
    fn transient_transport_markers_retry() {
        for message in ["tcp connect error", "Network unreachable", "dns lookup failed"] {
            let err = RpcError::Transport(message.into());
            assert!(matches!(
                retry_decision(&err, 0),
                RetryDecision::Backoff(_)
            ));
        }
        let err = RpcError::Transport("tls certificate invalid".into());
        assert_eq!(retry_decision(&err, 0), RetryDecision::Surface);
    }

    #[test]
    fn client_errors_surface() {
        assert_eq!(retry_decision(&status(400, None), 0), RetryDecision::Surface);
        assert_eq!(retry_decision(&status(403, None), 0), RetryDecision::Surface);
        let err = RpcError::NotFound("missing".into());
        assert_eq!(retry_decision(&err, 0), RetryDecision::Surface);
    }

    /// Serve each canned response to one connection, in order.
    async fn serve_responses(responses: Vec<String>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    fn http_response(status_line: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn rate_limit_reset_sleeps_then_succeeds() {
        let reset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 1;
        let base = serve_responses(vec![
            http_response(
                "429 Too Many Requests",
                &format!("ratelimit-reset: {reset}\r\nContent-Type: application/json\r\n"),
                r#"{"error":"RateLimitExceeded","message":"slow down"}"#,
            ),
            http_response(
                "200 OK",
                "Content-Type: application/json\r\n",
                r#"{"did":"did:plc:resolved"}"#,
            ),
        ])
        .await;

        let manager = RpcManager::new("http://unused.invalid".into());
        let did = manager.resolve_handle(&base, "alice.test").await.unwrap();

        // the first canned response was a 429, so success proves the manager
        // slept until the advertised reset and re-attempted exactly once
        assert_eq!(did, "did:plc:resolved");
    }

    #[tokio::test]
    async fn xrpc_not_found_maps_to_not_found() {
        let base = serve_responses(vec![http_response(
            "400 Bad Request",
            "Content-Type: application/json\r\n",
            r#"{"error":"RecordNotFound","message":"could not locate record"}"#,
        )])
        .await;

        let manager = RpcManager::new("http://unused.invalid".into());
        let result: Result<ResolveHandleOutput, _> = manager
            .query_no_retry(&base, |http, base| async move {
                xrpc_get(
                    http,
                    &base,
                    "com.atproto.repo.getRecord",
                    &[],
                    Duration::from_secs(5),
                )
                .await
            })
            .await;

        assert!(matches!(result, Err(RpcError::NotFound(_))));
    }

    #[tokio::test]
    async fn did_not_found_is_negatively_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/did%3Aplc%3Agone")
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let manager = RpcManager::new(server.url());

        let first = manager.resolve_did_endpoint("did:plc:gone").await;
        assert!(matches!(first, Err(RpcError::DidNotFound(_))));

        // second lookup is served from the negative cache
        let second = manager.resolve_did_endpoint("did:plc:gone").await;
        assert!(matches!(second, Err(RpcError::DidNotFound(_))));

        mock.assert_async().await;
    }
}
