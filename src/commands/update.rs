//! The `ble-dfu` update command.
//!
//! Wires command-line arguments, the settings file, the firmware image and a
//! BLE connector into the DFU driver, and renders progress.

use std::path::PathBuf;

use clap::Args;
use log::{error, info};
use serde::Serialize;

use crate::dfu::{
    read_firmware, upload_firmware, BtleplugConnector, DeviceAddress, DfuConfig, DfuResult,
    DfuStage, UpdateSession,
};
use crate::settings::SettingsManager;

/// Arguments of an update run.
#[derive(Debug, Clone, Args)]
pub struct UpdateArgs {
    /// Firmware to flash: a raw application `.bin` or a legacy DFU `.zip`.
    #[arg(short, long, value_name = "PATH")]
    pub file: PathBuf,

    /// BLE address of the target, e.g. C3:4A:1F:00:B2:7E.
    #[arg(short = 'b', long, env = "BLE_DFU_ADDRESS")]
    pub address: String,

    /// Settings file (defaults to ./dfu_settings.json when present).
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// ATT MTU of the link.
    #[arg(long)]
    pub mtu: Option<u16>,

    /// Give up waiting for an acknowledgement after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub ack_timeout: Option<u64>,

    /// Give up scanning for the target after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub scan_timeout: Option<u64>,

    /// Print progress as JSON lines on stdout.
    #[arg(long)]
    pub json: bool,

    /// Write the effective options back to the settings file.
    #[arg(long)]
    pub save_config: bool,
}

impl UpdateArgs {
    /// Command-line values take precedence over the settings file.
    fn apply_overrides(&self, mut config: DfuConfig) -> DfuConfig {
        if let Some(mtu) = self.mtu {
            config.att_mtu = mtu;
        }
        if let Some(ms) = self.ack_timeout {
            config.ack_timeout_ms = Some(ms);
        }
        if let Some(ms) = self.scan_timeout {
            config.scan_timeout_ms = Some(ms);
        }
        config
    }
}

/// Progress event printed in `--json` mode.
#[derive(Debug, Clone, Serialize)]
pub struct DfuProgressEvent {
    /// Current stage name.
    pub stage: String,
    /// Bytes sent (for uploading stage).
    pub sent: Option<usize>,
    /// Total bytes (for uploading stage).
    pub total: Option<usize>,
    /// Progress percentage (0-100).
    pub percent: f32,
    /// Human-readable message.
    pub message: String,
}

impl From<DfuStage> for DfuProgressEvent {
    fn from(stage: DfuStage) -> Self {
        let (stage_name, sent, total) = match &stage {
            DfuStage::Connecting { .. } => ("connecting", None, None),
            DfuStage::Connected { .. } => ("connected", None, None),
            DfuStage::EnteringBootloader => ("bootloader", None, None),
            DfuStage::WaitingForBootloader => ("waiting", None, None),
            DfuStage::Starting => ("starting", None, None),
            DfuStage::SendingInit => ("init", None, None),
            DfuStage::Uploading { sent, total } => ("uploading", Some(*sent), Some(*total)),
            DfuStage::Validating => ("validating", None, None),
            DfuStage::Activating => ("activating", None, None),
            DfuStage::Complete => ("complete", None, None),
            DfuStage::Log { .. } => ("log", None, None),
        };

        Self {
            stage: stage_name.to_string(),
            sent,
            total,
            percent: stage.percent(),
            message: stage.message(),
        }
    }
}

/// Load settings, then apply command-line overrides and validate.
pub fn build_config(args: &UpdateArgs) -> DfuResult<DfuConfig> {
    let manager = match &args.config_path {
        Some(path) => SettingsManager::with_path(path),
        None => SettingsManager::new(&std::env::current_dir()?),
    };
    let config = args.apply_overrides(manager.load()?);
    config.validate()?;

    if args.save_config {
        manager.save(&config)?;
        info!("Saved settings to {}", manager.settings_path().display());
    }
    Ok(config)
}

/// Read the firmware and prepare everything sent before the first chunk.
///
/// Init packet fields from a package manifest replace the configured ones.
pub fn prepare_session(args: &UpdateArgs, config: DfuConfig) -> DfuResult<UpdateSession> {
    let package = read_firmware(&args.file)?;
    let config = match package.init_params {
        Some(params) => config.with_init_params(params),
        None => config,
    };
    UpdateSession::new(package.image, &config)
}

/// Render one progress stage.
fn report(stage: DfuStage, json: bool) {
    if json {
        match serde_json::to_string(&DfuProgressEvent::from(stage)) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode progress: {}", e),
        }
        return;
    }

    match &stage {
        DfuStage::Uploading { .. } => {
            info!("{} ({:.0}%)", stage.message(), stage.percent())
        }
        _ => info!("{}", stage.message()),
    }
}

/// Run a complete update.
pub async fn run_update(args: &UpdateArgs) -> DfuResult<()> {
    // Reject bad input before touching the file system or the radio
    let target = DeviceAddress::parse(&args.address)?;
    let config = build_config(args)?;
    let session = prepare_session(args, config.clone())?;

    let mut connector = BtleplugConnector::new(config.scan_timeout()).await?;
    let json = args.json;
    upload_firmware(&mut connector, &target, &session, |stage| report(stage, json)).await
}
