//! Node Module Tests
//!
//! ## Test Scopes
//! - **Roles**: Leader publication, worker registration and failover.
//! - **Supervision**: Re-joining with a fresh session after it is lost.
//! - **End to end**: A small in-process cluster answering queries over HTTP.

#[cfg(test)]
mod tests {
    use crate::coordination::memory::{CoordinationState, LocalConnector};
    use crate::coordination::store::MembershipStore;
    use crate::election::types::{ELECTION_NAMESPACE, ElectionRole};
    use crate::leader::client::HttpWorkerClient;
    use crate::leader::protocol::{ENDPOINT_START, UploadResult};
    use crate::node::service::SearchNode;
    use crate::node::types::{ClusterStatus, ENDPOINT_CLUSTER_STATUS, LEADER_INFO_PATH, NodeSettings};
    use crate::registry::types::REGISTRY_NAMESPACE;
    use crate::scoring::types::{ScoreTable, ScoringStrategy};
    use crate::worker::protocol::UPLOAD_FIELD;
    use crate::worker::service::WorkerService;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestNode {
        _dir: TempDir,
        node: Arc<SearchNode>,
        url: String,
    }

    /// Starts a node with its own document root and a live HTTP listener.
    async fn start_node(state: &Arc<CoordinationState>, documents: &[(&str, &str)]) -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        for (name, contents) in documents {
            std::fs::write(docs.join(name), contents).unwrap();
        }
        let worker = WorkerService::open(&docs, dir.path().join("index")).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let settings = NodeSettings {
            advertise: url.clone(),
            request_timeout: Duration::from_secs(2),
            upload_timeout: Duration::from_secs(10),
            scoring: ScoringStrategy::TfIdf,
        };
        let client = Arc::new(HttpWorkerClient::new(settings.request_timeout, settings.upload_timeout).unwrap());
        let node = SearchNode::new(
            settings,
            Arc::new(LocalConnector::new(state.clone())),
            worker,
            client,
        );

        let app = node.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        node.start().await.unwrap();

        TestNode { _dir: dir, node, url }
    }

    async fn wait_for_role(node: &SearchNode, role: ElectionRole) {
        let mut rx = node.state().subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|r| *r == role))
            .await
            .expect("role change timed out")
            .unwrap();
    }

    async fn wait_for_workers(node: &SearchNode, count: usize) {
        let mut rx = node.subscribe_workers();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.len() == count))
            .await
            .expect("worker snapshot never converged")
            .unwrap();
    }

    // ============================================================
    // ROLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_first_node_leads_and_publishes_address() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let first = start_node(&state, &[]).await;
        let observer = state.connect().await;

        assert_eq!(first.node.state().role(), ElectionRole::Leader);
        assert_eq!(
            observer.get_data(LEADER_INFO_PATH).await.unwrap(),
            first.url.as_bytes().to_vec()
        );
        // The leader is not part of the worker pool.
        assert!(observer
            .get_children(REGISTRY_NAMESPACE, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_followers_register_and_leader_sees_them() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[]).await;
        let second = start_node(&state, &[]).await;
        let third = start_node(&state, &[]).await;

        assert_eq!(second.node.state().role(), ElectionRole::Follower);
        assert_eq!(third.node.state().role(), ElectionRole::Follower);

        wait_for_workers(&leader.node, 2).await;
        assert_eq!(
            leader.node.workers().addresses,
            vec![second.url.clone(), third.url.clone()]
        );
    }

    #[tokio::test]
    async fn test_follower_takes_over_when_leader_leaves() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[]).await;
        let second = start_node(&state, &[]).await;
        let third = start_node(&state, &[]).await;
        wait_for_workers(&leader.node, 2).await;

        leader.node.shutdown().await.unwrap();

        wait_for_role(&second.node, ElectionRole::Leader).await;
        // The new leader leaves the pool it now coordinates.
        wait_for_workers(&second.node, 1).await;
        assert_eq!(second.node.workers().addresses, vec![third.url.clone()]);
        assert_eq!(third.node.state().role(), ElectionRole::Follower);

        let observer = state.connect().await;
        assert_eq!(
            observer.get_data(LEADER_INFO_PATH).await.unwrap(),
            second.url.as_bytes().to_vec()
        );
    }

    #[tokio::test]
    async fn test_follower_coordinator_routes_name_the_leader() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[]).await;
        let follower = start_node(&state, &[]).await;

        let response = reqwest::Client::new()
            .post(format!("{}{}", follower.url, ENDPOINT_START))
            .body("cat")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.text().await.unwrap().contains(&leader.url));
    }

    // ============================================================
    // SUPERVISION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_node_rejoins_after_session_loss() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[]).await;
        let follower = start_node(&state, &[]).await;
        wait_for_workers(&leader.node, 1).await;

        let old_session = follower.node.state().session().await.unwrap();
        let old_id = old_session.session_id().clone();
        state.close_session(&old_id).await.unwrap();

        // Back in the pool under a new session.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(session) = follower.node.state().session().await
                && session.session_id() != &old_id
                && follower.node.state().role() == ElectionRole::Follower
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "node never re-joined");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        wait_for_workers(&leader.node, 1).await;
        let observer = state.connect().await;
        assert_eq!(observer.get_children(ELECTION_NAMESPACE, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lone_leader_rejoins_as_leader() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let only = start_node(&state, &[]).await;
        let old_id = only.node.state().session().await.unwrap().session_id().clone();

        state.close_session(&old_id).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(session) = only.node.state().session().await
                && session.session_id() != &old_id
                && only.node.state().role() == ElectionRole::Leader
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "node never re-joined");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let observer = state.connect().await;
        assert_eq!(
            observer.get_data(LEADER_INFO_PATH).await.unwrap(),
            only.url.as_bytes().to_vec()
        );
    }

    // ============================================================
    // END TO END TESTS
    // ============================================================

    #[tokio::test]
    async fn test_cluster_answers_query_across_workers() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[("leader-only.txt", "cat cat cat")]).await;
        let _a = start_node(&state, &[("docX.txt", "cat cat")]).await;
        let _b = start_node(&state, &[("docY.txt", "cat")]).await;
        wait_for_workers(&leader.node, 2).await;

        let table: ScoreTable = reqwest::Client::new()
            .post(format!("{}{}", leader.url, ENDPOINT_START))
            .body("cat")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        // Only workers are queried; the leader's own shard is not.
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["docX.txt", "docY.txt"]);
        assert!((table["docX.txt"] - 2.0 * (2.0f64 / 3.0).log10()).abs() < 1e-9);
        assert!((table["docY.txt"] - (2.0f64 / 3.0).log10()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cluster_upload_then_download_through_leader() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[]).await;
        let big = start_node(&state, &[("big.txt", &"word ".repeat(5000))]).await;
        let small = start_node(&state, &[]).await;
        wait_for_workers(&leader.node, 2).await;
        let client = reqwest::Client::new();

        let form = reqwest::multipart::Form::new().part(
            UPLOAD_FIELD,
            reqwest::multipart::Part::bytes(b"fresh upload".to_vec()).file_name("fresh.txt"),
        );
        let uploaded: UploadResult = client
            .post(format!("{}/leader/upload", leader.url))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(uploaded.worker, small.url);
        assert!(!big.node.worker().documents_root().join("fresh.txt").exists());

        let body = client
            .get(format!("{}/leader/download", leader.url))
            .query(&[("path", "fresh.txt")])
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body.to_vec(), b"fresh upload".to_vec());
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = CoordinationState::new(Duration::from_secs(6));
        let leader = start_node(&state, &[("a.txt", "x")]).await;
        let follower = start_node(&state, &[]).await;
        wait_for_workers(&leader.node, 1).await;
        let client = reqwest::Client::new();

        let status: ClusterStatus = client
            .get(format!("{}{}", leader.url, ENDPOINT_CLUSTER_STATUS))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.role, ElectionRole::Leader);
        assert_eq!(status.leader.as_deref(), Some(leader.url.as_str()));
        assert_eq!(status.workers, Some(vec![follower.url.clone()]));
        assert_eq!(status.documents, 1);

        let status: ClusterStatus = client
            .get(format!("{}{}", follower.url, ENDPOINT_CLUSTER_STATUS))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.role, ElectionRole::Follower);
        assert_eq!(status.workers, None);
        assert_eq!(status.leader.as_deref(), Some(leader.url.as_str()));
    }
}
