use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use vx_adapters::llm::OpenAiCompatLlm;
use vx_adapters::router::ModelRouter;
use vx_adapters::stt::HttpSttClient;
use vx_adapters::tts::HttpTtsClient;
use vx_domain::config::{Config, ConfigSeverity, CorsConfig};
use vx_history::CallHistoryStore;

use vx_gateway::api;
use vx_gateway::cli::{Cli, Command, ConfigCommand};
use vx_gateway::hub::registry::SessionRegistry;
use vx_gateway::interrupt::InterruptManager;
use vx_gateway::pipeline::policy::KidFriendlyPolicy;
use vx_gateway::state::AppState;

// Exit codes: 0 OK, 1 fatal startup, 2 config error, 3 shutdown with
// pending history writes.
const EXIT_STARTUP: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_PENDING_WRITES: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing();
            serve(&cli.config).await
        }
        Command::Config(ConfigCommand::Validate) => {
            let config = match vx_gateway::cli::load_config(&cli.config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error loading config: {e}");
                    return ExitCode::from(EXIT_CONFIG);
                }
            };
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                ExitCode::from(EXIT_CONFIG)
            } else {
                println!("configuration OK ({} warning(s))", issues.len());
                ExitCode::SUCCESS
            }
        }
        Command::Config(ConfigCommand::Show) => {
            let config = match vx_gateway::cli::load_config(&cli.config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error loading config: {e}");
                    return ExitCode::from(EXIT_CONFIG);
                }
            };
            match toml::to_string_pretty(&config) {
                Ok(rendered) => {
                    println!("{rendered}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error rendering config: {e}");
                    ExitCode::from(EXIT_CONFIG)
                }
            }
        }
        Command::Version => {
            println!("voxline {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

/// Structured JSON tracing for the serve command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vx_gateway=debug")),
        )
        .json()
        .init();
}

async fn serve(config_path: &std::path::Path) -> ExitCode {
    tracing::info!("Voxline starting");

    // ── Config load + validation ─────────────────────────────────────
    let config = match vx_gateway::cli::load_config(config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        tracing::error!(
            errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count(),
            "configuration invalid"
        );
        return ExitCode::from(EXIT_CONFIG);
    }

    // ── State ────────────────────────────────────────────────────────
    let state = match build_state(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    // ── Periodic maintenance: deferred-write retry + backlog gauge ───
    {
        let history = state.history.clone();
        let registry = state.registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                history.retry_deferred();
                let health = history.health();
                if health.pending_writes > 0 || health.deferred_rows > 0 {
                    tracing::warn!(
                        pending = health.pending_writes,
                        deferred = health.deferred_rows,
                        "history write backlog"
                    );
                }
                tracing::debug!(
                    active_sessions = registry.len(),
                    turns = health.turns,
                    "maintenance tick"
                );
            }
        });
    }

    // ── Router + layers ──────────────────────────────────────────────
    let app = api::router()
        .layer(build_cors_layer(&config.server.cors))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_sessions * 2,
        ))
        .with_state(state.clone());

    // ── Bind + serve ─────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    tracing::info!(addr = %addr, "Voxline listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = serve_result {
        tracing::error!(error = %e, "server error");
        return ExitCode::from(EXIT_STARTUP);
    }

    // ── Drain the history queue before exiting ───────────────────────
    let drain = Duration::from_millis(config.history.shutdown_drain_ms);
    let pending = state.history.shutdown(drain).await;
    if pending > 0 {
        tracing::warn!(pending, "exiting with unflushed history rows");
        return ExitCode::from(EXIT_PENDING_WRITES);
    }
    tracing::info!("Voxline stopped");
    ExitCode::SUCCESS
}

fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // History store.
    let history = Arc::new(CallHistoryStore::open(&config.history)?);
    tracing::info!("call history ready");

    // Adapters.
    let stt = Arc::new(HttpSttClient::from_config(
        &config.adapters.stt,
        &config.adapters.circuit,
    )?);
    let llm = Arc::new(OpenAiCompatLlm::from_config(
        &config.adapters.llm,
        &config.adapters.circuit,
    )?);
    let tts = Arc::new(HttpTtsClient::from_config(
        &config.adapters.tts,
        &config.adapters.circuit,
    )?);
    let gates = vec![stt.gate(), llm.gate(), tts.gate()];
    tracing::info!(
        stt = %config.adapters.stt.base_url,
        llm = %config.adapters.llm.base_url,
        tts = %config.adapters.tts.base_url,
        "adapters ready"
    );

    // Router + policy.
    let router = Arc::new(ModelRouter::from_config(&config.adapters.llm));
    let policy = Arc::new(KidFriendlyPolicy::new());
    tracing::info!(
        default_model = %config.adapters.llm.default_model,
        fallback_model = %config.adapters.llm.fallback_model,
        "model router ready"
    );

    // Session plumbing.
    let registry = Arc::new(SessionRegistry::new());
    let interrupts = Arc::new(InterruptManager::new(&config.pipeline));
    tracing::info!(
        max_sessions = config.server.max_sessions,
        auto_interrupt_ms = config.pipeline.auto_interrupt_ms,
        "session hub ready"
    );

    Ok(AppState {
        config,
        registry,
        interrupts,
        history,
        stt,
        llm,
        tts,
        router,
        policy,
        gates,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    } else {
        tracing::info!("shutdown signal received");
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins. A single
/// `"*"` entry means fully permissive; otherwise the list is exact.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::{header, Method};

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\", all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
