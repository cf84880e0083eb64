use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use reel_recs::{
    api::{create_collector_router, create_recs_router, CollectorState, RecsState},
    config::Config,
    db::{create_redis_client, Cache},
    queue::RedisStreamQueue,
    services::{BlendSettings, InteractionLog, Pipeline, PipelineSettings},
};

#[derive(Parser)]
#[command(name = "reel-recs", about = "Movie recommendation demo services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accepts interactions and publishes them to the queue
    Collector,
    /// Serves `/recs/{user_id}`
    Recommendations,
    /// Collects interactions, refreshes top items and retrains the model
    Pipeline {
        /// Delete the interaction log before starting
        #[arg(long)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Collector => run_collector(config).await,
        Command::Recommendations => run_recommendations(config).await,
        Command::Pipeline { fresh } => run_pipeline(config, fresh).await,
    }
}

async fn connect_queue(config: &Config, client: redis::Client, consumer: &str) -> anyhow::Result<RedisStreamQueue> {
    let queue = RedisStreamQueue::connect(
        client,
        &config.exchange,
        &config.queue_name,
        &config.routing_key,
        consumer,
    )
    .await?;
    Ok(queue)
}

async fn run_collector(config: Config) -> anyhow::Result<()> {
    let client = create_redis_client(&config.redis_url)?;
    let queue = connect_queue(&config, client.clone(), "collector").await?;
    let (cache, writer) = Cache::new(client).await;

    let state = CollectorState::new(Arc::new(queue), Arc::new(cache));
    let app = create_collector_router(state, &config.cors_origin)?;

    serve(app, &config.host, config.collector_port, "Event collector").await?;
    writer.shutdown().await;
    Ok(())
}

async fn run_recommendations(config: Config) -> anyhow::Result<()> {
    let client = create_redis_client(&config.redis_url)?;
    let queue = connect_queue(&config, client.clone(), "recommendations").await?;
    let (cache, writer) = Cache::new(client).await;

    let settings = BlendSettings {
        size: config.recs_size,
        epsilon: config.epsilon,
    };
    let state = RecsState::new(Arc::new(cache), Arc::new(queue), settings);
    let app = create_recs_router(state);

    serve(app, &config.host, config.recs_port, "Recommendations service").await?;
    writer.shutdown().await;
    Ok(())
}

async fn run_pipeline(config: Config, fresh: bool) -> anyhow::Result<()> {
    let client = create_redis_client(&config.redis_url)?;
    let queue = connect_queue(&config, client.clone(), "regular_pipeline").await?;
    let (cache, writer) = Cache::new(client).await;

    let pipeline = Pipeline::new(
        Arc::new(queue),
        Arc::new(cache),
        InteractionLog::new(config.interactions_path.clone()),
        PipelineSettings::from(&config),
    );

    if fresh {
        pipeline.reset_log().await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    pipeline.run(shutdown_rx).await;
    writer.shutdown().await;
    Ok(())
}

async fn serve(app: axum::Router, host: &str, port: u16, name: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "{} listening", name);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("{} stopped", name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
