//! Gateway Tests
//!
//! A coordination server and a stand-in leader run in-process; the gateway
//! is exercised over HTTP the way a browser or script would use it.

#[cfg(test)]
mod tests {
    use super::super::{AppState, GatewayStatus, ProxyResponse, app};
    use axum::Router;
    use axum::http::header;
    use axum::routing::{get, post};
    use search_cluster::coordination::memory::CoordinationState;
    use search_cluster::coordination::remote::RemoteConnector;
    use search_cluster::coordination::server::CoordinationServer;
    use search_cluster::coordination::store::{MembershipStore, create_or_set};
    use search_cluster::coordination::types::CreateMode;
    use search_cluster::election::types::ElectionRole;
    use search_cluster::node::types::{ClusterStatus, LEADER_INFO_PATH};
    use search_cluster::scoring::types::ScoringStrategy;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        url
    }

    fn fake_leader(address: String) -> Router {
        Router::new()
            .route(
                "/leader/start",
                post(|body: String| async move {
                    axum::Json(serde_json::json!({ "query": body, "docX.txt": 0.5 }))
                }),
            )
            .route(
                "/leader/download",
                get(|| async {
                    (
                        [(header::CONTENT_DISPOSITION, "attachment; filename=\"a.txt\"")],
                        "file body",
                    )
                }),
            )
            .route(
                "/cluster/status",
                get(move || {
                    let address = address.clone();
                    async move {
                        axum::Json(ClusterStatus {
                            role: ElectionRole::Leader,
                            address: address.clone(),
                            leader: Some(address),
                            workers: Some(vec!["http://w1".to_string(), "http://w2".to_string()]),
                            documents: 0,
                            scoring: ScoringStrategy::TfIdf,
                        })
                    }
                }),
            )
    }

    async fn start_fake_leader() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let leader = format!("http://{}", listener.local_addr().unwrap());
        let router = fake_leader(leader.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        leader
    }

    /// Starts coordination and the gateway; returns the gateway URL and a
    /// session for publishing leader addresses.
    async fn start_gateway() -> (String, Arc<dyn MembershipStore>) {
        let state = CoordinationState::new(Duration::from_secs(6));
        let coordination_url = serve(CoordinationServer::new(state.clone()).router()).await;

        let gateway = AppState {
            connector: Arc::new(RemoteConnector::new(coordination_url, Duration::from_secs(2))),
            session: Arc::new(Mutex::new(None)),
            client: reqwest::Client::new(),
        };
        let gateway_url = serve(app(gateway)).await;
        let publisher: Arc<dyn MembershipStore> = state.connect().await;

        (gateway_url, publisher)
    }

    async fn publish_leader(publisher: &Arc<dyn MembershipStore>, address: &str) {
        create_or_set(
            publisher.as_ref(),
            LEADER_INFO_PATH,
            address.as_bytes().to_vec(),
            CreateMode::Ephemeral,
        )
        .await
        .unwrap();
    }

    // ============================================================
    // FORWARDING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_search_is_forwarded_to_published_leader() {
        let (gateway, publisher) = start_gateway().await;
        let leader = start_fake_leader().await;
        publish_leader(&publisher, &leader).await;

        let response: ProxyResponse = reqwest::Client::new()
            .get(format!("{}/search", gateway))
            .query(&[("query", "cat dog")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.leader, leader);
        assert_eq!(response.body["query"], "cat dog");
        assert_eq!(response.body["docX.txt"], 0.5);
    }

    #[tokio::test]
    async fn test_download_keeps_attachment_headers() {
        let (gateway, publisher) = start_gateway().await;
        let leader = start_fake_leader().await;
        publish_leader(&publisher, &leader).await;

        let response = reqwest::Client::new()
            .get(format!("{}/download", gateway))
            .query(&[("path", "a.txt")])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_DISPOSITION],
            "attachment; filename=\"a.txt\""
        );
        assert_eq!(response.text().await.unwrap(), "file body");
    }

    #[tokio::test]
    async fn test_status_lists_leader_and_workers() {
        let (gateway, publisher) = start_gateway().await;
        let leader = start_fake_leader().await;
        publish_leader(&publisher, &leader).await;

        let status: GatewayStatus = reqwest::Client::new()
            .get(format!("{}/api/status", gateway))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(status.leader, leader);
        assert_eq!(status.workers, vec!["http://w1", "http://w2"]);
    }

    // ============================================================
    // FAILURE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_no_published_leader_is_unavailable() {
        let (gateway, _publisher) = start_gateway().await;

        let response = reqwest::Client::new()
            .get(format!("{}/search", gateway))
            .query(&[("query", "cat")])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unreachable_leader_is_bad_gateway() {
        let (gateway, publisher) = start_gateway().await;
        // Bound then dropped, so nothing listens there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        publish_leader(&publisher, &dead).await;

        let response = reqwest::Client::new()
            .get(format!("{}/search", gateway))
            .query(&[("query", "cat")])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
        assert!(response.text().await.unwrap().contains(&dead));
    }
}
