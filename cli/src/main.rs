//! `codex-agent`: serve the management API, or administer capability
//! tokens from the command line.

use std::net::SocketAddr;

use anyhow::Context;
use chrono::Duration;
use chrono::Utc;
use clap::Parser;
use clap::Subcommand;
use codex_agent_core::auth::TokenAuthenticator;
use codex_agent_core::config::AgentConfig;
use codex_agent_core::store::TokenStore;
use codex_agent_server::state::AppState;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "codex-agent",
    version,
    about = "Management daemon for codex rollouts: indexing, live tailing, and run orchestration"
)]
struct Cli {
    /// Action to perform. Defaults to `serve`.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP/WebSocket daemon.
    Serve {
        /// Bind host.
        #[arg(long, env = "CODEX_AGENT_HOST")]
        host: Option<String>,

        /// Bind port.
        #[arg(long, env = "CODEX_AGENT_PORT")]
        port: Option<u16>,
    },

    /// Administer capability tokens.
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue a token. The credential is printed exactly once.
    Create {
        #[arg(long)]
        name: String,

        /// Granted scope, repeatable (e.g. `session:read`, `queue:*`).
        #[arg(long = "permission", value_name = "SCOPE", required = true)]
        permissions: Vec<String>,

        /// Expiry horizon in days; omitted means no expiry.
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    /// List token records (hashes, never secrets).
    List,
    /// Revoke a token by id.
    Revoke { id: Uuid },
    /// Replace a token's secret, invalidating the old credential.
    Rotate { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::from_env();

    match cli.command {
        None | Some(Command::Serve {
            host: None,
            port: None,
        }) => serve(config).await,
        Some(Command::Serve { host, port }) => {
            let mut config = config;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Some(Command::Token { command }) => {
            let auth =
                TokenAuthenticator::new(TokenStore::new(&config), config.admin_token.clone());
            run_token_command(&auth, command).await
        }
    }
}

async fn serve(config: AgentConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let pid_path = config.pid_path();
    let state = AppState::new(config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(
        "codex-agent listening on http://{addr} (codex home: {})",
        state.config.codex_home.display()
    );

    // PID file only after a successful bind, so a losing second daemon
    // does not clobber the winner's entry.
    if let Some(parent) = pid_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(err) = std::fs::write(&pid_path, std::process::id().to_string()) {
        warn!("failed to write pid file {}: {err}", pid_path.display());
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    let result = codex_agent_server::serve(state, listener, shutdown).await;
    let _ = std::fs::remove_file(&pid_path);
    result.context("server failed")
}

async fn run_token_command(
    auth: &TokenAuthenticator,
    command: TokenCommand,
) -> anyhow::Result<()> {
    match command {
        TokenCommand::Create {
            name,
            permissions,
            expires_in_days,
        } => {
            let expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
            let issued = auth
                .create(name, permissions, expires_at)
                .await
                .context("token creation failed")?;
            println!("{}", issued.token);
            eprintln!(
                "token {} ({}) created; the credential above is not shown again",
                issued.record.id, issued.record.name
            );
        }
        TokenCommand::List => {
            for record in auth.list().await {
                let state = if record.revoked_at.is_some() {
                    "revoked"
                } else if record
                    .expires_at
                    .is_some_and(|expires_at| expires_at <= Utc::now())
                {
                    "expired"
                } else {
                    "active"
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id,
                    record.name,
                    state,
                    record.permissions.join(",")
                );
            }
        }
        TokenCommand::Revoke { id } => {
            let record = auth.revoke(id).await.context("revocation failed")?;
            eprintln!("token {} ({}) revoked", record.id, record.name);
        }
        TokenCommand::Rotate { id } => {
            let issued = auth.rotate(id).await.context("rotation failed")?;
            println!("{}", issued.token);
            eprintln!(
                "token {} ({}) rotated; the credential above is not shown again",
                issued.record.id, issued.record.name
            );
        }
    }
    Ok(())
}
