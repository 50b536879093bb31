//! Leader Module Tests
//!
//! ## Test Scopes
//! - **Search**: Scatter-gather over a fake worker pool, exclusion of failing workers.
//! - **Upload**: Least-loaded placement and its failure modes.
//! - **Download**: Local-first lookup and sequential worker probing.
//! - **Gating**: Coordinator routes refuse to serve on a non-leader.

#[cfg(test)]
mod tests {
    use crate::error::{Error, Result};
    use crate::leader::client::WorkerClient;
    use crate::leader::coordinator::{Leadership, QueryCoordinator, normalize_path};
    use crate::leader::handlers::routes;
    use crate::leader::protocol::ENDPOINT_START;
    use crate::registry::types::MembershipSnapshot;
    use crate::scoring::types::{DocumentScore, DocumentTerms, ScoringStrategy};
    use crate::worker::service::WorkerService;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    const A: &str = "http://worker-a";
    const B: &str = "http://worker-b";
    const C: &str = "http://worker-c";

    #[derive(Default)]
    struct FakeWorkers {
        reports: HashMap<String, Vec<DocumentTerms>>,
        scores: HashMap<String, Vec<DocumentScore>>,
        sizes: HashMap<String, u64>,
        files: HashMap<(String, String), Vec<u8>>,
        slow: Vec<String>,
        failing_uploads: Vec<String>,
        upload_delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl FakeWorkers {
        fn record(&self, call: &str, address: &str) {
            self.calls.lock().unwrap().push(format!("{} {}", call, address));
        }

        fn calls(&self, call: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(call))
                .cloned()
                .collect()
        }

        async fn maybe_stall(&self, address: &str) {
            if self.slow.iter().any(|a| a == address) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }

        fn unreachable(address: &str) -> Error {
            Error::Worker {
                address: address.to_string(),
                message: "connection refused".to_string(),
            }
        }
    }

    #[async_trait]
    impl WorkerClient for FakeWorkers {
        async fn process(&self, address: &str, _query: &str) -> Result<Vec<DocumentTerms>> {
            self.record("process", address);
            self.maybe_stall(address).await;
            self.reports
                .get(address)
                .cloned()
                .ok_or_else(|| Self::unreachable(address))
        }

        async fn score(&self, address: &str, _query: &str) -> Result<Vec<DocumentScore>> {
            self.record("score", address);
            self.scores
                .get(address)
                .cloned()
                .ok_or_else(|| Self::unreachable(address))
        }

        async fn index_size(&self, address: &str) -> Result<u64> {
            self.record("size", address);
            self.maybe_stall(address).await;
            self.sizes
                .get(address)
                .copied()
                .ok_or_else(|| Self::unreachable(address))
        }

        async fn upload(&self, address: &str, file_name: &str, _bytes: Vec<u8>) -> Result<String> {
            self.record("upload", address);
            tokio::time::sleep(self.upload_delay).await;
            if self.failing_uploads.iter().any(|a| a == address) {
                return Err(Self::unreachable(address));
            }
            Ok(file_name.to_string())
        }

        async fn download(&self, address: &str, path: &str) -> Result<Option<Vec<u8>>> {
            self.record("download", address);
            Ok(self
                .files
                .get(&(address.to_string(), path.to_string()))
                .cloned())
        }
    }

    struct FixedLeadership {
        leader: bool,
        address: Option<String>,
    }

    #[async_trait]
    impl Leadership for FixedLeadership {
        fn is_leader(&self) -> bool {
            self.leader
        }

        async fn leader_address(&self) -> Option<String> {
            self.address.clone()
        }
    }

    struct Harness {
        _dir: TempDir,
        _snapshot: watch::Sender<Arc<MembershipSnapshot>>,
        workers: Arc<FakeWorkers>,
        coordinator: Arc<QueryCoordinator>,
        local: Arc<WorkerService>,
    }

    async fn harness(addresses: &[&str], workers: FakeWorkers, strategy: ScoringStrategy) -> Harness {
        harness_with_role(addresses, workers, strategy, true).await
    }

    async fn harness_with_role(
        addresses: &[&str],
        workers: FakeWorkers,
        strategy: ScoringStrategy,
        leader: bool,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let local = WorkerService::open(dir.path().join("docs"), dir.path().join("index"))
            .await
            .unwrap();
        let snapshot = MembershipSnapshot::new(addresses.iter().map(|a| a.to_string()).collect());
        let (tx, rx) = watch::channel(Arc::new(snapshot));
        let workers = Arc::new(workers);
        let leadership = Arc::new(FixedLeadership {
            leader,
            address: Some("http://the-leader".to_string()),
        });

        let coordinator = QueryCoordinator::new(
            rx,
            workers.clone(),
            local.clone(),
            leadership,
            Duration::from_millis(200),
            Duration::from_secs(2),
            strategy,
        );

        Harness {
            _dir: dir,
            _snapshot: tx,
            workers,
            coordinator,
            local,
        }
    }

    fn report(document: &str, term: &str, count: u64) -> DocumentTerms {
        DocumentTerms {
            document: document.to_string(),
            term_frequency: HashMap::from([(term.to_string(), count)]),
        }
    }

    // ============================================================
    // SEARCH TESTS
    // ============================================================

    #[tokio::test]
    async fn test_no_workers_gives_empty_result() {
        let h = harness(&[], FakeWorkers::default(), ScoringStrategy::TfIdf).await;

        let table = h.coordinator.start("cat").await.unwrap();

        assert!(table.is_empty());
        assert!(h.workers.calls("process").is_empty());
    }

    #[tokio::test]
    async fn test_two_worker_idf_scenario() {
        let mut workers = FakeWorkers::default();
        workers.reports.insert(A.into(), vec![report("docX", "cat", 2)]);
        workers.reports.insert(B.into(), vec![report("docY", "cat", 1)]);
        let h = harness(&[A, B], workers, ScoringStrategy::TfIdf).await;

        let table = h.coordinator.start("cat").await.unwrap();

        assert!((table["docX"] - (-0.352)).abs() < 1e-3);
        assert!((table["docY"] - (-0.176)).abs() < 1e-3);
        let order: Vec<&str> = table.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["docX", "docY"]);
    }

    #[tokio::test]
    async fn test_failing_worker_is_excluded() {
        let mut workers = FakeWorkers::default();
        workers.reports.insert(A.into(), vec![report("a.txt", "cat", 1)]);
        // B has no reports: every call to it fails.
        let h = harness(&[A, B], workers, ScoringStrategy::TfIdf).await;

        let table = h.coordinator.start("cat").await.unwrap();

        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["a.txt"]);
        assert_eq!(h.workers.calls("process").len(), 2);
    }

    #[tokio::test]
    async fn test_slow_worker_times_out_without_failing_query() {
        let mut workers = FakeWorkers::default();
        workers.reports.insert(A.into(), vec![report("fast.txt", "cat", 1)]);
        workers.reports.insert(B.into(), vec![report("slow.txt", "cat", 1)]);
        workers.slow.push(B.into());
        let h = harness(&[A, B], workers, ScoringStrategy::TfIdf).await;

        let started = std::time::Instant::now();
        let table = h.coordinator.start("cat").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(table.contains_key("fast.txt"));
        assert!(!table.contains_key("slow.txt"));
    }

    #[tokio::test]
    async fn test_duplicate_documents_across_workers_are_summed() {
        let mut workers = FakeWorkers::default();
        workers.reports.insert(A.into(), vec![report("shared", "cat", 1), report("a", "dog", 1)]);
        workers.reports.insert(B.into(), vec![report("shared", "cat", 1), report("b", "dog", 1)]);
        let h = harness(&[A, B], workers, ScoringStrategy::TfIdf).await;

        let table = h.coordinator.start("cat").await.unwrap();

        // 4 reports, 1 distinct document holds "cat".
        let idf = (4.0f64 / 2.0).log10();
        assert!((table["shared"] - 2.0 * idf).abs() < 1e-9);
        assert_eq!(table.len(), 3);
    }

    #[tokio::test]
    async fn test_worker_relevance_strategy_sums_scores() {
        let mut workers = FakeWorkers::default();
        workers.scores.insert(
            A.into(),
            vec![DocumentScore { document: "x".into(), score: 1.25 }],
        );
        workers.scores.insert(
            B.into(),
            vec![
                DocumentScore { document: "x".into(), score: 0.75 },
                DocumentScore { document: "w".into(), score: 3.0 },
            ],
        );
        let h = harness(&[A, B, C], workers, ScoringStrategy::WorkerRelevance).await;

        let table = h.coordinator.start("anything").await.unwrap();

        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["w", "x"]);
        assert!((table["x"] - 2.0).abs() < 1e-9);
        assert!(h.workers.calls("process").is_empty());
        assert_eq!(h.workers.calls("score").len(), 3);
    }

    // ============================================================
    // UPLOAD TESTS
    // ============================================================

    #[tokio::test]
    async fn test_upload_goes_to_least_loaded_worker() {
        let mut workers = FakeWorkers::default();
        workers.sizes.insert(A.into(), 500);
        workers.sizes.insert(B.into(), 200);
        // C does not answer.
        let h = harness(&[A, B, C], workers, ScoringStrategy::TfIdf).await;

        let placement = h
            .coordinator
            .upload_to_least_loaded_worker("book.txt", b"words".to_vec())
            .await
            .unwrap();

        assert_eq!(placement.worker, B);
        assert_eq!(placement.document, "book.txt");
        assert_eq!(h.workers.calls("upload"), vec![format!("upload {}", B)]);
    }

    #[tokio::test]
    async fn test_upload_tie_goes_to_first_in_snapshot_order() {
        let mut workers = FakeWorkers::default();
        workers.sizes.insert(A.into(), 100);
        workers.sizes.insert(B.into(), 100);
        let h = harness(&[B, A], workers, ScoringStrategy::TfIdf).await;

        let placement = h
            .coordinator
            .upload_to_least_loaded_worker("book.txt", b"words".to_vec())
            .await
            .unwrap();

        assert_eq!(placement.worker, B);
    }

    #[tokio::test]
    async fn test_upload_without_workers() {
        let h = harness(&[], FakeWorkers::default(), ScoringStrategy::TfIdf).await;

        let result = h
            .coordinator
            .upload_to_least_loaded_worker("book.txt", b"words".to_vec())
            .await;

        assert!(matches!(result, Err(Error::NoWorkers)));
    }

    #[tokio::test]
    async fn test_upload_when_no_worker_reports_size() {
        let mut workers = FakeWorkers::default();
        workers.slow.push(B.into());
        workers.sizes.insert(B.into(), 1);
        let h = harness(&[A, B], workers, ScoringStrategy::TfIdf).await;

        let result = h
            .coordinator
            .upload_to_least_loaded_worker("book.txt", b"words".to_vec())
            .await;

        assert!(matches!(result, Err(Error::NoHealthyWorkers)));
        assert!(h.workers.calls("upload").is_empty());
    }

    #[tokio::test]
    async fn test_upload_is_attempted_once() {
        let mut workers = FakeWorkers::default();
        workers.sizes.insert(A.into(), 10);
        workers.sizes.insert(B.into(), 20);
        workers.failing_uploads.push(A.into());
        let h = harness(&[A, B], workers, ScoringStrategy::TfIdf).await;

        let result = h
            .coordinator
            .upload_to_least_loaded_worker("book.txt", b"words".to_vec())
            .await;

        assert!(matches!(result, Err(Error::Worker { .. })));
        assert_eq!(h.workers.calls("upload"), vec![format!("upload {}", A)]);
    }

    #[tokio::test]
    async fn test_upload_outlasting_request_timeout_completes() {
        let mut workers = FakeWorkers::default();
        workers.sizes.insert(A.into(), 10);
        workers.upload_delay = Duration::from_millis(600);
        let h = harness(&[A], workers, ScoringStrategy::TfIdf).await;

        let placement = h
            .coordinator
            .upload_to_least_loaded_worker("big.txt", vec![b'x'; 1024])
            .await
            .unwrap();

        assert_eq!(placement.worker, A);
        assert_eq!(placement.document, "big.txt");
    }

    #[tokio::test]
    async fn test_empty_upload_rejected_before_probing() {
        let mut workers = FakeWorkers::default();
        workers.sizes.insert(A.into(), 10);
        let h = harness(&[A], workers, ScoringStrategy::TfIdf).await;

        let result = h.coordinator.upload_to_least_loaded_worker("empty.txt", Vec::new()).await;

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert!(h.workers.calls("size").is_empty());
    }

    // ============================================================
    // DOWNLOAD TESTS
    // ============================================================

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/data/docs", "/data/docs/a/b.txt"), "a/b.txt");
        assert_eq!(normalize_path("/data/docs/", "/data/docs/b.txt"), "b.txt");
        assert_eq!(normalize_path("/data/docs", "b.txt"), "b.txt");
        assert_eq!(normalize_path("/data/docs", "/b.txt"), "b.txt");
        assert_eq!(normalize_path("/data/docs", "/data/docsother/b.txt"), "data/docsother/b.txt");
        assert_eq!(normalize_path("/data/docs", "dir\\b.txt"), "dir/b.txt");
    }

    #[tokio::test]
    async fn test_local_file_served_without_probing_workers() {
        let mut workers = FakeWorkers::default();
        workers
            .files
            .insert((A.to_string(), "local.txt".to_string()), b"remote".to_vec());
        let h = harness(&[A], workers, ScoringStrategy::TfIdf).await;
        h.local.upload("local.txt", b"local").await.unwrap();

        let absolute = h.local.documents_root().join("local.txt");
        let file = h
            .coordinator
            .leader_download(&absolute.to_string_lossy())
            .await
            .unwrap();

        assert_eq!(file.bytes, b"local".to_vec());
        assert!(h.workers.calls("download").is_empty());
    }

    #[tokio::test]
    async fn test_download_from_first_worker_holding_file() {
        let mut workers = FakeWorkers::default();
        workers
            .files
            .insert((B.to_string(), "books/x.txt".to_string()), b"from b".to_vec());
        workers
            .files
            .insert((C.to_string(), "books/x.txt".to_string()), b"from c".to_vec());
        let h = harness(&[A, B, C], workers, ScoringStrategy::TfIdf).await;

        let file = h.coordinator.leader_download("books/x.txt").await.unwrap();

        assert_eq!(file.file_name, "x.txt");
        assert_eq!(file.bytes, b"from b".to_vec());
        assert_eq!(
            h.workers.calls("download"),
            vec![format!("download {}", A), format!("download {}", B)]
        );
    }

    #[tokio::test]
    async fn test_download_missing_everywhere_probes_each_worker_once() {
        let h = harness(&[A, B, C], FakeWorkers::default(), ScoringStrategy::TfIdf).await;

        let result = h.coordinator.leader_download("nowhere.txt").await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(h.workers.calls("download").len(), 3);
    }

    // ============================================================
    // GATING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_non_leader_is_refused_with_leader_address() {
        let h = harness_with_role(&[A], FakeWorkers::default(), ScoringStrategy::TfIdf, false).await;

        match h.coordinator.ensure_leader().await {
            Err(Error::NotLeader(Some(address))) => assert_eq!(address, "http://the-leader"),
            other => panic!("expected NotLeader, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_route_on_follower_returns_503() {
        let h = harness_with_role(&[A], FakeWorkers::default(), ScoringStrategy::TfIdf, false).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes(h.coordinator.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let response = reqwest::Client::new()
            .post(format!("http://{}{}", addr, ENDPOINT_START))
            .body("cat")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.text().await.unwrap().contains("http://the-leader"));
        assert!(h.workers.calls("process").is_empty());
    }

    #[tokio::test]
    async fn test_start_route_on_leader_returns_sorted_json() {
        let mut workers = FakeWorkers::default();
        workers.reports.insert(
            A.into(),
            vec![report("b.txt", "cat", 1), report("a.txt", "cat", 3), report("c.txt", "dog", 1)],
        );
        let h = harness(&[A], workers, ScoringStrategy::TfIdf).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes(h.coordinator.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body = reqwest::Client::new()
            .post(format!("http://{}{}", addr, ENDPOINT_START))
            .body("cat")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let a = body.find("a.txt").unwrap();
        let b = body.find("b.txt").unwrap();
        let c = body.find("c.txt").unwrap();
        assert!(a < b && b < c);
    }
}
