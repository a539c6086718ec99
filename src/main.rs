//! story-reel — Binary Entrypoint
//! Boots the Axum HTTP server: config, store, providers, pipeline, the
//! optional ingest scheduler, and the operator routes.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use story_reel::api::{self, AppState};
use story_reel::config::{AppConfig, Secrets};
use story_reel::ingest::providers;
use story_reel::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg};
use story_reel::ingest::IngestOptions;
use story_reel::metrics::Metrics;
use story_reel::operator::Operator;
use story_reel::pipeline::{ExecutorSettings, Pipeline, StageExecutor};
use story_reel::services::Services;
use story_reel::store::StoryStore;

/// Install the global subscriber once. `LOG_FORMAT=json` switches to JSON
/// lines; the filter comes from `RUST_LOG`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("story_reel=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may already have installed one.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("load config")?;
    let secrets = Secrets::from_env();
    tracing::info!(?secrets, db = %cfg.store.database_path.display(), "starting story-reel");

    let metrics = match Metrics::init(&cfg) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let store = Arc::new(StoryStore::open(&cfg.store.database_path).context("open story store")?);

    let http = providers::http_client(Duration::from_secs(cfg.ingest.adapter_timeout_secs))
        .context("build http client")?;
    let sources = providers::from_config(&cfg.sources, http);
    // Uploads and speech synthesis run far longer than a feed fetch.
    let services_http = providers::http_client(Duration::from_secs(cfg.pipeline.stage_timeout_secs))
        .context("build services http client")?;
    let services = Services::from_config(&cfg, &secrets, services_http).context("build services")?;

    let executor = StageExecutor::new(services, ExecutorSettings::from(&cfg.pipeline));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        executor,
        cfg.store.output_dir.clone(),
        cfg.pipeline.workers,
    ));

    let ingest_opts = IngestOptions::from(&cfg.ingest);
    let _scheduler = spawn_scheduler(
        IngestSchedulerCfg {
            interval_secs: cfg.ingest.interval_secs,
            options: ingest_opts,
            weights: cfg.scoring.clone(),
        },
        sources.clone(),
        store.clone(),
    );

    let operator = Operator::new(store, pipeline, sources, cfg.scoring.clone(), ingest_opts);
    let router = api::create_router(AppState { operator }, metrics.as_ref());

    Ok(router.into())
}
