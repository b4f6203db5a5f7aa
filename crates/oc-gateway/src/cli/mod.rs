pub mod doctor;
pub mod config;

use clap::{Parser, Subcommand};

/// oc-gateway — a multi-agent conversation orchestrator.
#[derive(Debug, Parser)]
#[command(name = "oc-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Connect an out-of-process agent to a running gateway over
    /// WebSocket, acting as one named agent in a conversation.
    AgentJoin {
        /// Gateway WebSocket URL, e.g. `ws://127.0.0.1:8089/v1/ws`.
        #[arg(long)]
        url: String,
        /// Conversation to join.
        #[arg(long)]
        conversation_id: u64,
        /// Agent id this process will act as.
        #[arg(long)]
        agent_id: String,
        /// Built-in agent behavior: `echo` or `scripted`.
        #[arg(long, default_value = "echo")]
        agent_class: String,
        /// For `--agent-class scripted`: path to a JSON file of
        /// `[{"text": "...", "finality": "none"|"turn"|"conversation"}]`.
        #[arg(long)]
        script: Option<String>,
        /// Bearer token for the gateway's `?token=` auth, if enabled.
        #[arg(long)]
        token: Option<String>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load configuration from the path named by `OC_CONFIG` (default
/// `config.toml`), falling back to defaults when the file doesn't exist.
/// Shared by `serve`, `doctor`, and `config` so the logic lives in one
/// place (mirrors the teacher's `cli::load_config`).
pub fn load_config() -> anyhow::Result<(oc_domain::config::Config, String)> {
    let config_path = std::env::var("OC_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        oc_domain::config::Config::default()
    };

    Ok((config, config_path))
}
