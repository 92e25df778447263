//! ble-dfu - flash application firmware onto nRF5x devices running the
//! Nordic legacy DFU bootloader, over Bluetooth Low Energy.
//!
//! Environment variables:
//!   BLE_DFU_ADDRESS - Default target address
//!   RUST_LOG        - Log filter (overrides `-v`)

mod commands;
mod dfu;
mod settings;

#[cfg(test)]
mod test_helpers;

use clap::Parser;
use env_logger::Env;
use log::{debug, error};

use commands::update::{run_update, UpdateArgs};

/// Update nRF5x application firmware over BLE (legacy Nordic DFU).
#[derive(Parser)]
#[command(name = "ble-dfu")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    update: UpdateArgs,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .init();

    debug!("ble-dfu v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run_update(&cli.update).await {
        error!("[{}] {}", e.error_code(), e);
        let code = if e.is_configuration_error() {
            2
        } else if e.is_protocol_violation() {
            3
        } else {
            1
        };
        std::process::exit(code);
    }
}
