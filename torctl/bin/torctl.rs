//! Command-line utility for a Tor control port
//!
//! This tool provides:
//! - Watching events (circuits, streams, bandwidth, log messages)
//! - Querying information and configuration values
//! - Hashing control-port passwords

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use torctl::{
    ChannelHandler, Connection, ControlConfig, Endpoint, Event, EventCategory, generate_specifier,
};

/// Command-line utility for a Tor control port
#[derive(Parser, Debug)]
#[command(name = "torctl")]
#[command(about = "Talk to a Tor control port", long_about = None)]
#[command(version)]
struct Cli {
    /// Control port address (host:port, host, or port)
    #[arg(short, long)]
    endpoint: Option<Endpoint>,

    /// Control-port password
    #[arg(short, long, env = "TORCTL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Authentication cookie file, used when no password is given
    #[arg(short, long)]
    cookie: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Subscribe to events and print them until interrupted
    Watch {
        /// Event categories to subscribe to (comma separated)
        #[arg(long, value_delimiter = ',')]
        events: Vec<EventCategory>,
    },
    /// Print information values
    Info {
        /// Keys to query
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print a configuration value
    Option {
        /// Option name
        key: String,
    },
    /// Hash a password for use as a stored control-port password
    HashPassword {
        /// Password to hash
        secret: String,
    },
}

/// Contents of the configuration file
///
/// ```ron
/// (
///     control: (endpoint: "127.0.0.1:9051"),
///     cookie_file: Some("/var/lib/tor/control_auth_cookie"),
///     events: ["CIRC", "BW"],
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    control: ControlConfig,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    cookie_file: Option<PathBuf>,
    #[serde(default)]
    events: Vec<EventCategory>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    torctl_common::logging::init();

    let cli = Cli::parse();

    if let Commands::HashPassword { secret } = &cli.command {
        println!("{}", generate_specifier(secret.as_bytes()));
        return Ok(());
    }

    let mut settings = load_settings()?;
    if let Some(endpoint) = cli.endpoint {
        settings.control.endpoint = endpoint;
    }
    if cli.password.is_some() {
        settings.password = cli.password;
    }
    if cli.cookie.is_some() {
        settings.cookie_file = cli.cookie;
    }

    let connection = Connection::connect_with(settings.control.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", settings.control.endpoint))?;
    tracing::info!(dialect = %connection.dialect(), "Connected");

    let authenticated = match (&settings.password, &settings.cookie_file) {
        (Some(password), _) => connection.authenticate(password).await,
        (None, Some(cookie)) => connection.authenticate_cookie(cookie).await,
        (None, None) => connection.authenticate_none().await,
    };
    authenticated.context("Authentication failed")?;

    let result = match cli.command {
        Commands::Watch { events } => {
            let events = if events.is_empty() {
                settings.events
            } else {
                events
            };
            watch(&connection, &events, settings.control.event_capacity).await
        }
        Commands::Info { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            for (key, value) in connection.get_info_many(&keys).await? {
                println!("{key}={value}");
            }
            Ok(())
        }
        Commands::Option { key } => {
            println!("{key}={}", connection.get_option(&key).await?);
            Ok(())
        }
        Commands::HashPassword { .. } => Ok(()),
    };

    connection.close().await;
    result
}

async fn watch(connection: &Connection, events: &[EventCategory], capacity: usize) -> anyhow::Result<()> {
    if events.is_empty() {
        anyhow::bail!("No event categories given; use --events or the config file");
    }

    let (handler, mut receiver) = ChannelHandler::new(capacity);
    connection.register_handler(Arc::new(handler));
    connection.set_events(events).await?;

    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
            event = receiver.recv() => match event {
                Some(event) => println!("{}", describe(&event)),
                None => anyhow::bail!("Event stream ended"),
            },
            _ = liveness.tick() => {
                if connection.is_closed() {
                    anyhow::bail!("Control connection closed");
                }
            }
        }
    }
}

fn describe(event: &Event) -> String {
    match event {
        Event::CircuitStatus(e) => format!("CIRC {} {} {}", e.id, e.status, e.path.join(",")),
        Event::StreamStatus(e) => {
            format!("STREAM {} {} {} {}", e.id, e.status, e.circuit, e.target)
        }
        Event::OrConnStatus(e) => format!("ORCONN {} {}", e.target, e.status),
        Event::Bandwidth(e) => format!("BW {} {}", e.read, e.written),
        Event::NewDescriptor(e) => format!("NEWDESC {}", e.identities.join(" ")),
        Event::LogMessage(e) => format!("{} {}", e.severity, e.message),
        Event::AddressMapped(e) => match e.expiry {
            Some(expiry) => format!("ADDRMAP {} {} \"{expiry}\"", e.from, e.to),
            None => format!("ADDRMAP {} {} NEVER", e.from, e.to),
        },
        Event::Unknown(e) => format!("{} {}", e.kind, String::from_utf8_lossy(&e.body)),
    }
}

fn load_settings() -> anyhow::Result<Settings> {
    let Some(path) = find_config_file()? else {
        return Ok(Settings::default());
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

/// Find the configuration file using the following precedence:
/// 1. `TORCTL_CONFIG` environment variable
/// 2. ./torctl.config.ron (current working directory)
/// 3. /etc/torctl/torctl.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(env_path) = std::env::var("TORCTL_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "TORCTL_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    Ok([
        PathBuf::from("./torctl.config.ron"),
        PathBuf::from("/etc/torctl/torctl.config.ron"),
    ]
    .into_iter()
    .find(|path| path.exists()))
}
