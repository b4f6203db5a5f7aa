use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use oc_domain::config::{Config, ConfigSeverity};
use oc_host::AgentHost;
use oc_runtime::{EchoAgent, ReconnectBackoff, ScriptedAgent, ScriptedLine, UserQueryBroker};
use oc_scheduler::{CompetitionPolicy, DefaultPolicy, Policy, Scheduler};
use oc_store::file::FileStore;
use oc_store::memory::MemoryStore;
use oc_store::EventStore;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

mod cli;
mod router;
mod state;
mod ws;

use cli::{Cli, Command, ConfigCommand};
use state::AppState;

/// Exit codes per the orchestrator's CLI contract: 0 success, 1
/// configuration error, 2 runtime error.
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            match cli::load_config() {
                Ok((config, _path)) => match validate_config(&config) {
                    Ok(()) => run_server(Arc::new(config)).await.map_err(|e| (EXIT_RUNTIME_ERROR, e)),
                    Err(e) => Err((EXIT_CONFIG_ERROR, e)),
                },
                Err(e) => Err((EXIT_CONFIG_ERROR, e)),
            }
        }
        Some(Command::Doctor) => match cli::load_config() {
            Ok((config, path)) => match cli::doctor::run(&config, &path).await {
                Ok(true) => Ok(()),
                Ok(false) => Err((EXIT_CONFIG_ERROR, anyhow::anyhow!("doctor checks failed"))),
                Err(e) => Err((EXIT_RUNTIME_ERROR, e)),
            },
            Err(e) => Err((EXIT_CONFIG_ERROR, e)),
        },
        Some(Command::Config(ConfigCommand::Validate)) => match cli::load_config() {
            Ok((config, path)) => {
                if cli::config::validate(&config, &path) {
                    Ok(())
                } else {
                    Err((EXIT_CONFIG_ERROR, anyhow::anyhow!("config validation failed")))
                }
            }
            Err(e) => Err((EXIT_CONFIG_ERROR, e)),
        },
        Some(Command::Config(ConfigCommand::Show)) => match cli::load_config() {
            Ok((config, _path)) => {
                cli::config::show(&config);
                Ok(())
            }
            Err(e) => Err((EXIT_CONFIG_ERROR, e)),
        },
        Some(Command::AgentJoin { url, conversation_id, agent_id, agent_class, script, token }) => {
            init_tracing();
            agent_join(url, conversation_id, agent_id, agent_class, script, token).await.map_err(|e| (EXIT_RUNTIME_ERROR, e))
        }
        Some(Command::Version) => {
            println!("oc-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err((code, err)) = outcome {
        eprintln!("error: {err:#}");
        std::process::exit(code);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,oc_gateway=debug")))
        .json()
        .init();
}

/// Runs `Config::validate` and logs every issue, failing only on errors
/// (warnings are surfaced but non-fatal). Kept separate from `run_server`
/// so `main` can map a bad config to exit code 1 and a failure once the
/// server is actually starting to exit code 2.
fn validate_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if Config::has_errors(&issues) {
        anyhow::bail!("config validation failed with {} error(s)", issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count());
    }
    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("orchestrator gateway starting");

    // ── Event store ──────────────────────────────────────────────────
    let store: Arc<dyn EventStore> = if config.storage.is_memory() {
        tracing::info!("event store: in-memory (no durability across restarts)");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!(path = %config.storage.db_path, "event store: file-backed");
        Arc::new(FileStore::open(&config.storage.db_path).context("opening file-backed event store")?)
    };

    // ── Bus ──────────────────────────────────────────────────────────
    let bus = Arc::new(oc_bus::Bus::new(config.bus.subscriber_queue_depth));
    tracing::info!(queue_depth = config.bus.subscriber_queue_depth, "subscription bus ready");

    // ── Scheduler ────────────────────────────────────────────────────
    let policy: Box<dyn Policy> = match config.scheduler.policy {
        oc_domain::config::SchedulerPolicyKind::Default => Box::new(DefaultPolicy),
        oc_domain::config::SchedulerPolicyKind::Competition => Box::new(CompetitionPolicy),
    };
    let scheduler = Arc::new(Scheduler::new(store.clone(), bus.clone(), policy, config.scheduler.clone()));
    tracing::info!(policy = ?config.scheduler.policy, "scheduler ready");

    // ── Agent host (built-in, in-process agents) ────────────────────
    let queries = Arc::new(UserQueryBroker::new());
    let host = Arc::new(AgentHost::new(store.clone(), bus.clone(), scheduler.clone(), queries.clone()));
    host.resume_all().context("resuming agents for active conversations")?;
    tracing::info!(resumed = host.list().len(), "agent host ready");

    // ── Periodic claim sweep (competition policy claim expiry) ──────
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if let Err(e) = scheduler.sweep_expired() {
                    tracing::warn!(error = %e, "claim sweep failed");
                }
            }
        });
    }

    // ── API token (read once, hash for constant-time comparison) ───
    let api_token_hash = match std::env::var(&config.auth.token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.auth.token_env, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(env_var = %config.auth.token_env, "API bearer-token auth DISABLED");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        store,
        bus,
        scheduler,
        host,
        queries,
        remote_queries: Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new())),
        api_token_hash,
    };

    let cors_layer = build_cors_layer(&config.server.cors);
    let app = router::build(state).layer(cors_layer).layer(tower::limit::ConcurrencyLimitLayer::new(256));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "orchestrator gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

fn build_cors_layer(cors: &oc_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str.strip_prefix(prefix.as_str()).map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit())).unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// `oc-gateway agent-join`: runs one built-in agent out-of-process,
/// connected to an already-running gateway over the JSON-RPC WebSocket
/// transport. The same `EchoAgent`/`ScriptedAgent` the host supervises
/// in-process are reused here — only the transport differs.
async fn agent_join(url: String, conversation_id: u64, agent_id: String, agent_class: String, script: Option<String>, token: Option<String>) -> anyhow::Result<()> {
    let agent: Arc<dyn oc_runtime::Agent> = match agent_class.as_str() {
        "echo" => Arc::new(EchoAgent),
        "scripted" => {
            let lines = match script {
                Some(path) => load_script(&path)?,
                None => Vec::new(),
            };
            Arc::new(ScriptedAgent::new(lines))
        }
        other => anyhow::bail!("unknown --agent-class {other} (expected echo or scripted)"),
    };

    let config = oc_runtime::WsAgentConfig {
        gateway_ws_url: url,
        token,
        conversation_id,
        agent_id: agent_id.clone(),
        since_seq: None,
        request_timeout: Duration::from_secs(30),
        reconnect: ReconnectBackoff::default(),
    };

    tracing::info!(agent_id = %agent_id, conversation_id, "agent-join connecting");
    oc_runtime::run_agent(config, agent, tokio_util::sync::CancellationToken::new()).await.context("agent run loop failed")?;
    Ok(())
}

fn load_script(path: &str) -> anyhow::Result<Vec<ScriptedLine>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading script {path}"))?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).with_context(|| format!("parsing script {path}"))?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let text = entry.get("text")?.as_str()?.to_string();
            let finality = match entry.get("finality").and_then(|f| f.as_str()) {
                Some("turn") => oc_domain::Finality::Turn,
                Some("conversation") => oc_domain::Finality::Conversation,
                _ => oc_domain::Finality::None,
            };
            Some(ScriptedLine::new(text, finality))
        })
        .collect())
}
