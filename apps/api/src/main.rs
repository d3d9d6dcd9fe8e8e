mod classifier;
mod config;
mod db;
mod errors;
mod interview;
mod llm_client;
mod models;
mod playback;
mod routes;
mod speech;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::interview::llm_oracle::LlmOracle;
use crate::interview::machine::MachineDeps;
use crate::interview::profile::PgProfileResolver;
use crate::interview::registry::SessionRegistry;
use crate::interview::store::PgSessionStore;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::speech::OpenAiSpeech;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Interview API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM-backed oracle
    let llm = LlmClient::new(config.anthropic_api_key.clone());
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let oracle = Arc::new(LlmOracle::new(llm));

    // Speech-to-text and synthesis share one client
    let speech = Arc::new(OpenAiSpeech::new(
        config.speech_api_key.clone(),
        &config.speech_api_url,
    ));

    let deps = MachineDeps {
        store: Arc::new(PgSessionStore::new(db.clone())),
        oracle,
        settings: config.interview.clone(),
    };
    info!(
        "Interview settings: min viable turns {}, answer timeout {:?}, question limit {:?}",
        config.interview.min_viable_turns,
        config.interview.answer_timeout,
        config.interview.question_limit
    );

    let sessions = Arc::new(SessionRegistry::new(
        deps,
        Arc::new(PgProfileResolver::new(db.clone())),
        speech.clone(),
        config.playback.clone(),
        &config.public_base_url,
    ));
    sessions.spawn_sweeper();

    // Build app state
    let state = AppState {
        db,
        sessions,
        transcriber: speech.clone(),
        synthesizer: speech,
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()), // TODO: restrict CORS origins to the web client's domain
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
