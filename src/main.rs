use anyhow::{bail, Context};
use biogas_iot::identity::{DeviceKey, Signer};
use biogas_iot::logging::{log_debug, log_error, log_warn};
use biogas_iot::modbus::frame::{decode_reply, encode_query, FUNCTION_READ_INPUT_REGISTERS};
use biogas_iot::modbus::REPLY_REGISTER_COUNT;
use biogas_iot::util::hex::{format_hex_compact, parse_hex_lenient};
use biogas_iot::{appliance, init_logger, log_info, AppConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "biogas-iot")]
#[command(about = "Biogas generator metering and carbon-credit appliance")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial device of the meter bus
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[arg(short, long, global = true)]
    baudrate: Option<u32>,

    /// Use simulated meters and sensors
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the appliance until Ctrl-C
    Run,
    /// Decode a reply frame given in hex
    Decode { frame: String },
    /// Print the measurement query for a meter address
    Query {
        #[arg(value_parser = parse_address)]
        address: u8,
    },
    /// Create the device key if missing and print the identity
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },
    /// Print the latest verified checkpoints
    Status,
}

fn parse_address(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid RTU address {value:?}: {e}"))
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }
    if let Some(baudrate) = cli.baudrate {
        config.baud_rate = baudrate;
    }
    if cli.mock {
        config.mock = true;
    }
    Ok(config)
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let appliance = tokio::spawn(appliance::run(config, shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            log_info("Shutting down");
            let _ = shutdown_tx.send(true);
        }
        _ = shutdown_tx.closed() => {}
    }

    let result = appliance.await.context("appliance task")?;
    if let Err(e) = &result {
        log_error(&format!("Appliance stopped: {e}"));
    }
    result.context("appliance stopped with an error")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Decode { frame } => {
            let bytes = parse_hex_lenient(&frame).context("parsing frame hex")?;
            match decode_reply(&bytes) {
                Ok(reading) => println!("{}", serde_json::to_string_pretty(&reading)?),
                Err(e) => bail!("{}: {e}", format_hex_compact(&bytes)),
            }
        }
        Commands::Query { address } => {
            let frame = encode_query(
                address,
                FUNCTION_READ_INPUT_REGISTERS,
                0x0000,
                REPLY_REGISTER_COUNT as u16,
            );
            println!("{}", hex::encode(frame));
        }
        Commands::Keygen { force } => {
            let key = if force || !config.key_path.exists() {
                if force {
                    log_warn(&format!("Replacing device key {}", config.key_path.display()));
                }
                let key = DeviceKey::generate();
                key.store(&config.key_path)
                    .with_context(|| format!("writing {}", config.key_path.display()))?;
                key
            } else {
                log_debug("Device key exists, keeping it");
                DeviceKey::load_or_generate(&config.key_path)?
            };
            println!("{}", key.identity());
        }
        Commands::Status => {
            let report = appliance::status(&config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
