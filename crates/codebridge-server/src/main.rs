use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod auth;
mod config;
mod server;
mod telemetry;

pub use config::{LogFormat, ServerConfig};

/// Ten years; keeps `chrono::Duration::hours` in range.
const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 10;

/// Verification code relay: phone pushes in, browser listeners out.
#[derive(Debug, Parser)]
#[command(name = "codebridge-server", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay server (default).
    Serve,
    /// Print a signed identity token for a listener of `account`.
    ///
    /// Requires CODEBRIDGE_TOKEN_SECRET to match the running server.
    IssueToken {
        account: String,
        /// Token lifetime in hours; 0 issues a token that never expires.
        #[arg(
            long,
            default_value_t = 24,
            value_parser = clap::value_parser!(i64).range(0..=MAX_TOKEN_TTL_HOURS)
        )]
        ttl_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let server_config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::IssueToken { account, ttl_hours } => {
            let secret = server_config.token_secret.as_deref().ok_or_else(|| {
                anyhow::anyhow!("CODEBRIDGE_TOKEN_SECRET must be set to issue tokens")
            })?;
            let verifier = auth::HmacTokenVerifier::new(secret.as_bytes());
            let ttl = (ttl_hours > 0).then(|| chrono::Duration::hours(ttl_hours));
            println!("{}", verifier.issue(&account, ttl)?);
            Ok(())
        }
        Command::Serve => {
            telemetry::init(server_config.log_format)
                .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

            info!("Codebridge Server starting...");
            info!("Version: {}", env!("CARGO_PKG_VERSION"));
            server_config.log_config();

            server::start(server_config).await
        }
    }
}
