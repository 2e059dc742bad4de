//! canmq - Bidirectional CAN ⇄ MQTT gateway
//!
//! Usage:
//!   canmq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -i, --interface <IF>   CAN interface (default: can0)
//!   -H, --host <HOST>      Broker hostname (default: localhost)
//!   -p, --port <PORT>      Broker port (default: 1883)
//!   -t, --topic <PREFIX>   Topic namespace prefix
//!   --read / --write       Restrict the gateway to one direction
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use canmq::config::Config;
use canmq::gateway::Gateway;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// canmq - Bidirectional CAN ⇄ MQTT gateway
#[derive(Parser, Debug)]
#[command(name = "canmq")]
#[command(version = "0.2.0")]
#[command(about = "Bridges a SocketCAN interface to an MQTT broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CAN interface to bind
    #[arg(short, long)]
    interface: Option<String>,

    /// Broker hostname or IP address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Broker TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Topic namespace prefix (default: can/<hostname>/<interface>)
    #[arg(short, long)]
    topic: Option<String>,

    /// Username for broker authentication
    #[arg(short, long)]
    username: Option<String>,

    /// Password for broker authentication
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Only publish frames read from the bus
    #[arg(long)]
    read: bool,

    /// Only write received commands onto the bus
    #[arg(long)]
    write: bool,

    /// QoS for telemetry publishes (0 or 1)
    #[arg(short, long)]
    qos: Option<u8>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use defaults
    let mut config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    // RUST_LOG takes precedence; otherwise the CLI/config level applies
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_tracing_level().to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(config_path) = &args.config {
        info!("Loaded configuration from {:?}", config_path);
    }

    // CLI args override file config
    if let Some(interface) = args.interface {
        config.can.interface = interface;
    }
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(topic) = args.topic {
        config.gateway.topic_prefix = Some(topic);
    }
    if let Some(username) = args.username {
        config.broker.username = Some(username);
    }
    if let Some(password) = args.password {
        config.broker.password = Some(password);
    }
    if let Some(qos) = args.qos {
        config.gateway.qos = qos;
    }
    // Direction flags: naming either one restricts to exactly what was named
    if args.read || args.write {
        config.gateway.read = args.read;
        config.gateway.write = args.write;
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting canmq gateway");
    info!("  CAN interface: {}", config.can.interface);
    info!("  Broker: {}:{}", config.broker.host, config.broker.port);
    info!("  Topic prefix: {}", config.topic_prefix());
    info!(
        "  Directions: read={} write={}",
        config.gateway.read, config.gateway.write
    );
    info!("  QoS: {}", config.gateway.qos);

    let gateway = Gateway::new(config);
    if let Err(e) = gateway.run().await {
        error!("Gateway stopped: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
