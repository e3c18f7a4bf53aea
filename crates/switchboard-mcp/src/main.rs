//! Switchboard MCP Server: entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use switchboard::SnapshotReader;
use switchboard_mcp::config::{resolve_store_path, ServerConfig};
use switchboard_mcp::protocol::ProtocolHandler;
use switchboard_mcp::session::SessionManager;
use switchboard_mcp::transport::StdioTransport;
use switchboard_mcp::types::{Implementation, MCP_VERSION};

#[derive(Parser)]
#[command(
    name = "switchboard-mcp",
    about = "MCP server for Switchboard: durable sessions, validated tool calls, long-running tasks",
    version
)]
struct Cli {
    /// Path to the switchboard.toml configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Path to the .swbd store file.
    #[arg(short, long, global = true)]
    store: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve {
        /// Identity used to pick the session profile.
        #[arg(long)]
        identity: Option<String>,
    },

    /// Start MCP server over HTTP.
    #[cfg(feature = "http")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,

        /// Bearer token for authentication.
        /// Also reads from SWITCHBOARD_TOKEN env var, then the config file.
        #[arg(long)]
        token: Option<String>,
    },

    /// Validate a .swbd store file.
    Validate {
        /// Store file to check. Defaults to the resolved store path.
        path: Option<String>,
    },

    /// Print server capabilities and unit names as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   switchboard-mcp completions bash > ~/.local/share/bash-completion/completions/switchboard-mcp
    ///   switchboard-mcp completions zsh > ~/.zfunc/_switchboard-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve { identity: None }) {
        Commands::Serve { identity } => {
            let config = ServerConfig::resolve(cli.config.as_deref())?;
            let store_path = resolve_store_path(cli.store.as_deref());
            let core = Arc::new(SessionManager::open(config, store_path).await?);
            let handler = ProtocolHandler::connect(core, identity).await;
            let transport = StdioTransport::new(handler);
            transport.run().await?;
        }

        #[cfg(feature = "http")]
        Commands::ServeHttp { addr, token } => {
            use switchboard_mcp::transport::HttpTransport;

            let config = ServerConfig::resolve(cli.config.as_deref())?;
            let store_path = resolve_store_path(cli.store.as_deref());

            // Resolve token: CLI flag > env var > config
            let effective_token = token
                .or_else(|| std::env::var("SWITCHBOARD_TOKEN").ok())
                .or_else(|| config.auth_token.clone());

            tracing::info!("Switchboard MCP server");
            tracing::info!("Store: {}", store_path.display());
            if effective_token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let core = Arc::new(SessionManager::open(config, store_path).await?);
            let transport = HttpTransport::new(core.clone(), effective_token);
            let served = transport.run(&addr).await;
            core.save().await?;
            served?;
        }

        Commands::Validate { path } => {
            let store_path = path
                .map(PathBuf::from)
                .unwrap_or_else(|| resolve_store_path(cli.store.as_deref()));
            let checked = SnapshotReader::read_header_from_file(&store_path).and_then(|header| {
                SnapshotReader::read_from_file(&store_path).map(|snapshot| (header, snapshot))
            });
            match checked {
                Ok((header, snapshot)) => {
                    println!("Valid store file: {}", store_path.display());
                    println!("  Format version: {}", header.version);
                    println!("  Sessions: {}", snapshot.sessions.len());
                    println!("  Messages: {}", snapshot.messages.len());
                    println!("  Tasks: {}", snapshot.tasks.len());
                }
                Err(e) => {
                    eprintln!("Invalid store file {}: {e}", store_path.display());
                    std::process::exit(1);
                }
            }
        }

        Commands::Info => {
            let config = ServerConfig::resolve(cli.config.as_deref())?;
            let core = SessionManager::in_memory(config)?;
            let negotiator = core.negotiator();
            let capabilities = negotiator.server_capabilities(&negotiator.default_profile());
            let info = serde_json::json!({
                "server": Implementation::server(&core.config().server_name),
                "protocol_version": MCP_VERSION,
                "capabilities": capabilities,
                "tools": core.tools().names(),
                "prompts": core.prompts().names(),
                "profiles": core.config().profiles.keys().collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "switchboard-mcp", &mut std::io::stdout());
        }

        Commands::Repl => {
            let config = ServerConfig::resolve(cli.config.as_deref())?;
            let store_path = resolve_store_path(cli.store.as_deref());
            let runtime = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || {
                switchboard_mcp::repl::run(runtime, config, store_path)
            })
            .await??;
        }
    }

    Ok(())
}
