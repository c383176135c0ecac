//! smart-usb command line
//!
//! Drives the printer bridge against the local libusb host: list devices,
//! inspect them, print a file, or issue a raw method call.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use common::setup_logging;
use printer::config::{PrinterConfig, load_config, parse_hex_id};
use printer::host::LibusbHost;
use printer::{MethodCall, PrinterService, dispatch};
use protocol::{Direction, EndpointRef};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "smart-usb")]
#[command(author, version, about = "Bridge to USB receipt and label printers")]
#[command(long_about = "
Talks to USB printers through libusb: enumerates devices, negotiates access,
claims the printer interface and streams bytes to its bulk OUT endpoint.

EXAMPLES:
    # List attached devices
    smart-usb list

    # Print a file to the configured default printer
    smart-usb print receipt.bin

    # Print stdin to a specific printer
    cat receipt.bin | smart-usb print --vid 0x0fe6 --pid 0x811e -

    # Read a status reply from bulk IN endpoint 2
    smart-usb read --id /dev/bus/usb/001/004

    # Issue a raw method call
    smart-usb call '{\"method\":\"getDeviceList\"}'

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/smart-usb/printer.toml
    3. /etc/smart-usb/printer.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB devices
    List,

    /// Show manufacturer, product and serial number of a device
    Describe {
        identifier: String,

        /// Ask for access first if it is not held
        #[arg(long)]
        request_permission: bool,
    },

    /// Show one configuration of a device
    Config {
        index: u8,

        /// Device identifier
        #[arg(long)]
        id: String,
    },

    /// Send a file (or `-` for stdin) to a printer
    Print {
        /// Vendor ID, e.g. 0x0fe6 (defaults to the configured printer)
        #[arg(long, value_name = "HEX", requires = "pid")]
        vid: Option<String>,

        /// Product ID, e.g. 0x811e
        #[arg(long, value_name = "HEX", requires = "vid")]
        pid: Option<String>,

        file: PathBuf,
    },

    /// Read once from a bulk IN endpoint, e.g. a printer status reply
    Read {
        /// Device identifier
        #[arg(long)]
        id: String,

        /// Endpoint number
        #[arg(long, default_value_t = 2)]
        endpoint: u8,

        /// Maximum number of bytes to read
        #[arg(long, default_value_t = 64)]
        length: usize,
    },

    /// Execute a JSON-encoded method call
    Call { json: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = PrinterConfig::default();
        let path = PrinterConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        load_config(path).context("Failed to load configuration")?
    } else {
        PrinterConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    let Some(command) = args.command else {
        bail!("No command given, see --help");
    };

    info!("smart-usb v{}", env!("CARGO_PKG_VERSION"));

    let host = LibusbHost::new().context("Failed to initialize libusb")?;
    let (service, notices) =
        PrinterService::attach(Arc::new(host), &config).context("Failed to start printer bridge")?;

    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            info!("{}", notice.message());
        }
    });

    let result = run(&service, &config, command).await;

    service.shutdown();
    result
}

async fn run(service: &PrinterService, config: &PrinterConfig, command: Command) -> Result<()> {
    match command {
        Command::List => print_json(&service.list_devices()),

        Command::Describe {
            identifier,
            request_permission,
        } => {
            let detail = service
                .describe_device(&identifier, request_permission)
                .await?;
            print_json(&detail)
        }

        Command::Config { index, id } => {
            if !service.open_device(&id).await? {
                bail!("Failed to open {}", id);
            }
            print_json(&service.configuration(index).await?)
        }

        Command::Print { vid, pid, file } => {
            let (vendor_id, product_id) = match (vid, pid) {
                (Some(vid), Some(pid)) => (parse_hex_id(&vid, "VID")?, parse_hex_id(&pid, "PID")?),
                _ => config
                    .target_ids()?
                    .ok_or_else(|| anyhow!("No printer given and none configured"))?,
            };

            let data = read_input(&file)?;

            if !service.connect_device(vendor_id, product_id).await? {
                bail!("No printer {:04x}:{:04x} available", vendor_id, product_id);
            }

            let job = service
                .print_bytes(data)
                .ok_or_else(|| anyhow!("Printer session is not open"))?;
            let report = job.wait().await?;

            println!(
                "Printed {} bytes in {} chunks ({} failed)",
                report.bytes_written, report.chunks, report.failed_chunks
            );
            Ok(())
        }

        Command::Read {
            id,
            endpoint,
            length,
        } => {
            if !service.open_device(&id).await? {
                bail!("Failed to open {}", id);
            }

            let data = service
                .bulk_transfer_in(
                    EndpointRef::new(endpoint, Direction::In),
                    length,
                    config.transfer.default_timeout_ms,
                )
                .await?;

            let hex: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
            println!("{}", hex.join(" "));
            Ok(())
        }

        Command::Call { json } => {
            let call: MethodCall =
                serde_json::from_str(&json).context("Failed to parse method call")?;
            let result = dispatch(service, call).await?;
            print_json(&result)
        }
    }
}

fn read_input(file: &Path) -> Result<Vec<u8>> {
    if file.as_os_str() == "-" {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .context("Failed to read stdin")?;
        return Ok(data);
    }

    std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
