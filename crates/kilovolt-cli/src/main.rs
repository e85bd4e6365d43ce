//! kvctl
//!
//! Command line access to a Kilovolt key-value store.

use clap::{Parser, Subcommand};
use kilovolt_client::{ClientConfig, Session, DEFAULT_ENDPOINT};
use tokio::signal;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "kvctl")]
#[command(about = "Command line client for the Kilovolt key-value store")]
struct Args {
    /// WebSocket endpoint of the Kilovolt server
    #[arg(short, long, env = "KILOVOLT_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Password, if the server requires authentication
    #[arg(short, long, env = "KILOVOLT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the value of a key
    Get { key: String },

    /// Set a key to a value
    Set { key: String, value: String },

    /// List keys starting with a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Print changes to a key until interrupted
    Watch {
        pattern: String,

        /// Treat the pattern as a key prefix
        #[arg(long)]
        prefix: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig::new(args.endpoint).maybe_password(args.password);
    let session = Session::new(config);
    session.connect().await?;
    debug!("Server version: {:?}", session.version());

    let result = run(&session, args.command).await;
    session.close().await;
    result
}

async fn run(session: &Session, action: Action) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        Action::Get { key } => {
            println!("{}", session.get(&key).await?);
        }
        Action::Set { key, value } => {
            session.set(&key, &value).await?;
        }
        Action::List { prefix } => {
            for key in session.list(&prefix).await? {
                println!("{}", key);
            }
        }
        Action::Watch { pattern, prefix } => {
            let print = |key: &str, value: &str| println!("{} = {}", key, value);
            let id = if prefix {
                session.subscribe_prefix(&pattern, print).await?
            } else {
                session.subscribe(&pattern, print).await?
            };
            info!("Watching {} (Ctrl+C to stop)", pattern);

            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = session.closed() => {
                    return Err("connection closed by server".into());
                }
            }

            if prefix {
                session.unsubscribe_prefix(&pattern, id).await?;
            } else {
                session.unsubscribe(&pattern, id).await?;
            }
        }
    }
    Ok(())
}
