use axum::Router;
use clap::Parser;
use search_cluster::config::{Cli, Command, CoordinatorArgs, NodeArgs};
use search_cluster::coordination::memory::{CoordinationState, LocalConnector};
use search_cluster::coordination::remote::RemoteConnector;
use search_cluster::coordination::server::CoordinationServer;
use search_cluster::coordination::store::Connector;
use search_cluster::election::types::ElectionRole;
use search_cluster::leader::client::HttpWorkerClient;
use search_cluster::node::service::SearchNode;
use search_cluster::worker::service::WorkerService;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Coordinator(args) => run_coordinator(args).await,
        Command::Node(args) => run_node(args).await,
    }
}

async fn run_coordinator(args: CoordinatorArgs) -> anyhow::Result<()> {
    let state = CoordinationState::new(args.session_timeout());
    tokio::spawn(state.clone().run_expiry_loop());

    let app = CoordinationServer::new(state).router();

    tracing::info!(
        "Coordination server listening on {} (session timeout {:?})",
        args.bind,
        args.session_timeout()
    );
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    let settings = args.settings();
    tracing::info!("Starting node on {} (advertised as {})", args.bind, settings.advertise);

    // 1. Local shard:
    let worker = WorkerService::open(&args.documents, &args.index).await?;
    tracing::info!(
        "Indexed {} documents under {}",
        worker.document_count(),
        worker.documents_root().display()
    );

    // 2. Coordination backend:
    let mut app = Router::new();
    let connector: Arc<dyn Connector> = match (&args.coordination, args.embed_coordinator) {
        (_, true) => {
            let state = CoordinationState::new(args.session_timeout());
            tokio::spawn(state.clone().run_expiry_loop());
            app = app.merge(CoordinationServer::new(state.clone()).router());
            tracing::info!("Hosting the coordination service in-process");
            Arc::new(LocalConnector::new(state))
        }
        (Some(url), false) => {
            tracing::info!("Using coordination service at {}", url);
            Arc::new(RemoteConnector::new(url.trim_end_matches('/'), settings.request_timeout))
        }
        (None, false) => anyhow::bail!("--coordination is required unless --embed-coordinator is set"),
    };

    // 3. Node and HTTP router. The listener is bound before joining so that
    //    peers can reach the advertised address as soon as it is published.
    let client = Arc::new(HttpWorkerClient::new(settings.request_timeout, settings.upload_timeout)?);
    let node = SearchNode::new(settings, connector, worker, client);
    let app = app.merge(node.router());

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // 4. Join the cluster:
    node.start().await?;

    // 5. Spawn stats reporter:
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let role = stats_node.state().role();
            if role == ElectionRole::Leader {
                let workers = stats_node.workers();
                tracing::info!("Cluster stats: leader with {} workers", workers.len());
                for address in &workers.addresses {
                    tracing::info!("  - {}", address);
                }
            } else {
                tracing::info!(
                    "Cluster stats: {} serving {} documents",
                    role,
                    stats_node.worker().document_count()
                );
            }
        }
    });

    tracing::info!("HTTP server listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    tokio::select! {
        result = server => {
            result??;
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
        }
    }

    node.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
