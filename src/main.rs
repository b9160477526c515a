//! Binary entrypoint for the SmartyBridge CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the supervised bridge node
//! - `init` - create a starter `config.toml`
//! - `identity` - print the node hostname and broker client id
//! - `smoke-test --port <path> [-b <baud>] [--timeout <s>]` - capture one serial message
//!
//! See the library crate docs for module‑level details: `smartybridge::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use smartybridge::config::{Config, HardwareConfig, RadioBackend};
use smartybridge::forward::LoopExit;
use smartybridge::hardware::{
    EnablePin, LogConsole, NullLine, OutputLine, ProcessRestarter, SharedConsole, SysfsLine,
};
use smartybridge::identity::NodeIdentity;
use smartybridge::link::{ManagedRadio, NmcliRadio, WirelessRadio};
use smartybridge::node::NodeHandles;
use smartybridge::supervisor::{FaultSupervisor, Verdict};

#[derive(Parser)]
#[command(name = "smartybridge")]
#[command(about = "Bridge a serial device to an MQTT broker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge node
    Start {
        /// Serial device to forward (overrides serial.port)
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Print the node hostname and broker client id
    Identity,
    /// Wait for one serial message and print a JSON summary
    SmokeTest {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting SmartyBridge v{}", env!("CARGO_PKG_VERSION"));
            if let Some(port) = port {
                config.serial.port = port;
            }
            run_supervised(config).await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if std::path::Path::new(&cli.config).exists() {
                warn!("Overwriting existing configuration at {}", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Identity => {
            let config = Config::load(&cli.config).await.unwrap_or_default();
            init_logging(&None, cli.verbose);
            let identity = NodeIdentity::detect(config.node.unique_id.as_deref())?;
            println!("hostname:  {}", identity.hostname());
            println!(
                "client id: {}{}",
                identity.client_id(),
                config.node.client_suffix
            );
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => {
            let config = Config::load(&cli.config).await.ok();
            init_logging(&config, cli.verbose);
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud, timeout);
                error!("SmokeTest requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                use smartybridge::forward::{collect_message, ForwardSettings};
                use smartybridge::logutil::hex_snippet;
                use smartybridge::serial::{Readiness, SerialSource, UartSource};
                use std::time::Duration;

                let serial_config = config.map(|c| c.serial).unwrap_or_default();
                let settings = ForwardSettings::from_config(&serial_config);
                let mut source = UartSource::open(&port, baud).await?;
                info!("Starting smoke test on {} @ {} baud", port, baud);

                let readiness = source.wait_readable(Duration::from_secs(timeout)).await;
                let message = match &readiness {
                    Readiness::Readable => collect_message(&mut source, &settings).await,
                    Readiness::Error(e) => {
                        warn!("Serial error: {}", e);
                        Vec::new()
                    }
                    Readiness::TimedOut => Vec::new(),
                };
                let status_ok = !message.is_empty();
                let payload = serde_json::json!({
                    "status": if status_ok { "ok" } else { "no_data" },
                    "port": port,
                    "baud": baud,
                    "readiness": format!("{:?}", readiness),
                    "bytes": message.len(),
                    "preview": hex_snippet(&message, 32),
                    "timeout_seconds": timeout,
                });
                println!("{}", payload);
                std::process::exit(if status_ok { 0 } else { 1 });
            }
        }
    }

    Ok(())
}

fn enable_line(hardware: &HardwareConfig) -> Result<Box<dyn OutputLine + Send>> {
    match hardware.enable_gpio {
        Some(gpio) => {
            let line = SysfsLine::open(gpio)
                .map_err(|e| anyhow::anyhow!("Failed to open enable GPIO {}: {}", gpio, e))?;
            Ok(Box::new(line))
        }
        None => {
            warn!("hardware.enable_gpio not set; the attached device is never gated");
            Ok(Box::new(NullLine))
        }
    }
}

async fn run_supervised(config: Config) -> Result<()> {
    let identity = NodeIdentity::detect(config.node.unique_id.as_deref())?;
    let pin = EnablePin::new(enable_line(&config.hardware)?, config.hardware.enable_active_low);
    let console = SharedConsole::new(Box::new(LogConsole::new(&config.serial.port)));
    let handles = NodeHandles {
        pin: pin.clone(),
        console: console.clone(),
    };
    let mut supervisor = FaultSupervisor::new(
        pin,
        console,
        Box::new(ProcessRestarter),
        config.supervisor.cooldown(),
    );

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for interrupts: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let verdict = match config.wifi.backend {
        RadioBackend::Managed => {
            let run = start_node(&config, &identity, ManagedRadio::new(), handles);
            supervisor.supervise(run, interrupt).await
        }
        RadioBackend::Nmcli => {
            let radio = NmcliRadio::new(&config.wifi.interface);
            let run = start_node(&config, &identity, radio, handles);
            supervisor.supervise(run, interrupt).await
        }
    };

    match verdict {
        Verdict::Maintenance => info!("Halted for maintenance"),
        Verdict::Stopped => info!("Bridge stopped"),
        Verdict::Restarted => info!("Restart requested"),
    }
    Ok(())
}

#[cfg(feature = "serial")]
async fn start_node<R: WirelessRadio>(
    config: &Config,
    identity: &NodeIdentity,
    radio: R,
    handles: NodeHandles,
) -> Result<LoopExit> {
    use smartybridge::mqtt::MqttTransport;
    use smartybridge::serial::UartSource;

    smartybridge::node::run_node(
        config,
        identity,
        radio,
        MqttTransport::new().with_max_packet_size(config.max_packet_bytes()),
        || UartSource::open(&config.serial.port, config.serial.baud_rate),
        handles,
    )
    .await
}

#[cfg(not(feature = "serial"))]
async fn start_node<R: WirelessRadio>(
    _config: &Config,
    _identity: &NodeIdentity,
    _radio: R,
    _handles: NodeHandles,
) -> Result<LoopExit> {
    anyhow::bail!("serial forwarding requires the 'serial' feature")
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs echo to the terminal as well as the file.
        let is_tty = atty::is(atty::Stream::Stdout);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
