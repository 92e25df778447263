//! Nordic legacy DFU (Device Firmware Update) over Bluetooth Low Energy.
//!
//! Flashes an application image onto an nRF5x device running the legacy
//! (SDK 11 and earlier) DFU bootloader.
//!
//! # Protocol Overview
//!
//! The DFU process consists of:
//! 1. **Connection** - Scan for the target address, connect, discover the DFU service
//! 2. **Bootloader Entry** - An application-role peer is sent StartDfu and resets
//! 3. **Start** - StartDfu plus the image size on the packet characteristic
//! 4. **Init Transfer** - Init packet bracketed by InitDfuParams begin/end
//! 5. **Firmware Transfer** - The image in MTU-sized chunks
//! 6. **Validation** - Device checks the image CRC
//! 7. **Activation** - Device applies and boots the new firmware
//!
//! # Example
//!
//! ```ignore
//! use dfu::{read_firmware, upload_firmware, BtleplugConnector, DeviceAddress, DfuConfig, UpdateSession};
//!
//! let config = DfuConfig::default();
//! let package = read_firmware("app.bin")?;
//! let session = UpdateSession::new(package.image, &config)?;
//! let mut connector = BtleplugConnector::new(config.scan_timeout()).await?;
//! let target = DeviceAddress::parse("C3:4A:1F:00:B2:7E")?;
//!
//! upload_firmware(&mut connector, &target, &session, |stage| {
//!     println!("{}: {:.0}%", stage.message(), stage.percent())
//! })
//! .await?;
//! ```

pub mod ble;
pub mod chunker;
pub mod config;
pub mod crc;
pub mod device;
pub mod error;
pub mod firmware_reader;
pub mod packet;
pub mod protocol;
pub mod state_machine;
pub mod transport;

// Re-export what the update command needs
pub use ble::BtleplugConnector;
pub use config::DfuConfig;
pub use device::DeviceAddress;
pub use error::{DfuError, DfuResult};
pub use firmware_reader::read_firmware;
pub use protocol::{upload_firmware, DfuStage, UpdateSession};
