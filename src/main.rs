use std::sync::Arc;

use axum::http::Method;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leaderboard::api;
use leaderboard::compaction_task::{start_compaction_task, CompactionConfig};
use leaderboard::config::AppConfig;
use leaderboard::pipeline::{run_consumer, ConsumerConfig, ProducerConfig};
use leaderboard::{
    AppState, InMemoryBroker, InMemoryScoreRepository, LeaderboardService, LeaderboardStore,
    MessageBroker, PostgresScoreRepository, ScoreProducer, ScoreRepository,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leaderboard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting leaderboard service");

    let cfg = AppConfig::from_env();
    info!(
        host = %cfg.server.host,
        port = cfg.server.port,
        instance_id = %cfg.broker.instance_id,
        "Configuration loaded"
    );

    // Durable repository: PostgreSQL when configured, in-memory otherwise.
    // A configured database that stays unreachable after the retries is
    // fatal; without durable storage the cache could not be rebuilt.
    let repository: Arc<dyn ScoreRepository> = if cfg.database.configured {
        match PostgresScoreRepository::connect(&cfg.database).await {
            Ok(repo) => Arc::new(repo),
            Err(e) => {
                error!(error = %e, "Failed to initialize PostgreSQL repository");
                std::process::exit(1);
            }
        }
    } else {
        warn!("DB_HOST not set, using in-memory score storage (lost on restart)");
        Arc::new(InMemoryScoreRepository::new())
    };

    // Root shutdown signal, propagated to the pipeline workers.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(LeaderboardStore::new());

    // Warm the cache from durable storage before serving; games replay in
    // parallel, bounded by the configured concurrency.
    if let Err(e) = store
        .initialize_from_repository(Arc::clone(&repository), cfg.server.warmup_concurrency)
        .await
    {
        error!(error = %e, "Failed to warm leaderboard cache");
        std::process::exit(1);
    }

    // Pipeline: producer buffers submissions toward the broker, consumer
    // pulls batches back out into durable storage and the cache.
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());

    let producer_config = ProducerConfig {
        topic: cfg.broker.scores_topic.clone(),
        ..ProducerConfig::default()
    };
    let (producer, producer_handle) = ScoreProducer::start(
        Arc::clone(&broker),
        producer_config,
        shutdown_rx.clone(),
    );

    let service = Arc::new(LeaderboardService::new(
        Arc::clone(&store),
        Arc::clone(&repository),
        Some(Arc::new(producer)),
    ));

    let consumer_config = ConsumerConfig {
        topic: cfg.broker.scores_topic.clone(),
        group: cfg.broker.consumer_group(),
        batch_size: cfg.broker.batch_size,
        batch_timeout: cfg.broker.batch_timeout,
        ..ConsumerConfig::default()
    };
    let consumer_handle = tokio::spawn(run_consumer(
        Arc::clone(&broker),
        Arc::clone(&service),
        consumer_config,
        shutdown_rx.clone(),
    ));

    // Optional periodic compaction of the windowed indexes.
    if cfg.compaction.enabled {
        let compaction_config = CompactionConfig {
            interval: cfg.compaction.interval,
            enabled: true,
        };
        tokio::spawn(start_compaction_task(
            Arc::clone(&store),
            compaction_config,
        ));
    } else {
        info!("Window compaction disabled; stale entries persist until enabled");
    }

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = api::router(AppState::new(Arc::clone(&service)))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind server address");
            std::process::exit(1);
        }
    };
    info!("Server running on {}", addr);

    let shutdown_tx = Arc::new(shutdown_tx);
    let shutdown_signal = {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, stopping server gracefully");
            let _ = shutdown_tx.send(true);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        error!(error = %e, "Server error");
    }

    // The server may also stop on error; make sure the workers see the
    // shutdown signal before they are awaited.
    let _ = shutdown_tx.send(true);

    // Let the pipeline drain in-flight batches before exiting.
    if let Err(e) = producer_handle.await {
        warn!(error = %e, "Producer worker did not stop cleanly");
    }
    if let Err(e) = consumer_handle.await {
        warn!(error = %e, "Consumer worker did not stop cleanly");
    }

    info!("Server gracefully stopped");
}
