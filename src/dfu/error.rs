//! DFU error types for the Nordic legacy BLE DFU implementation.

use thiserror::Error;

/// Result type alias for DFU operations.
pub type DfuResult<T> = Result<T, DfuError>;

/// Errors that can occur during DFU operations.
#[derive(Debug, Error)]
pub enum DfuError {
    /// Bluetooth stack error from btleplug.
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device address is not 12 hex digits.
    #[error("Invalid BLE address '{input}': expected 12 hex digits")]
    InvalidAddress { input: String },

    /// Firmware path argument is empty.
    #[error("No firmware file given")]
    EmptyPath,

    /// Firmware file cannot be opened or read.
    #[error("Cannot read firmware {path}: {source}")]
    FirmwareUnreadable {
        path: String,
        source: std::io::Error,
    },

    /// Settings file or option values are unusable.
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },

    /// No Bluetooth adapter available on this host.
    #[error("No Bluetooth adapter found")]
    NoAdapter,

    /// Target device was not seen while scanning.
    #[error("Device {address} not found within {timeout_ms}ms")]
    DiscoveryTimeout { address: String, timeout_ms: u64 },

    /// Scan event stream ended before the target appeared.
    #[error("Scan ended before device {address} was found")]
    ScanEnded { address: String },

    /// DFU service missing on the connected peer.
    #[error("DFU service not found on device")]
    ServiceNotFound,

    /// Required DFU characteristic missing on the connected peer.
    #[error("DFU characteristic {name} not found")]
    CharacteristicNotFound { name: &'static str },

    /// Timeout waiting for an acknowledgement from the device.
    #[error("Timeout waiting for response to {operation}")]
    Timeout { operation: String },

    /// Acknowledgement did not have the expected three bytes.
    #[error("Bad response length from target: {length}")]
    BadResponseLength { length: usize },

    /// Acknowledgement did not start with the response opcode.
    #[error("Bad response opcode from target: 0x{opcode:02X}")]
    BadResponseOpcode { opcode: u8 },

    /// DFU protocol returned an error response.
    #[error("DFU response error: code {code} - {message}")]
    DfuResponse { code: u8, message: String },

    /// Acknowledgement echoed an opcode that is unknown or out of sequence.
    #[error("Unexpected response to opcode 0x{opcode:02X} while {state}")]
    UnexpectedResponse { opcode: u8, state: String },

    /// Event delivered to a state machine that cannot accept it.
    #[error("Invalid DFU state: {state}")]
    InvalidState { state: String },

    /// Device was disconnected during operation.
    #[error("Device disconnected during {operation}")]
    DeviceDisconnected { operation: String },

    /// Device kept coming back in application mode after reset requests.
    #[error("Device did not enter bootloader after {resets} reset(s)")]
    BootloaderNotReached { resets: u32 },

    /// Required file missing from firmware.zip.
    #[error("Missing file in firmware.zip: {filename}")]
    MissingFile { filename: String },

    /// Invalid or malformed manifest.json.
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    /// Package only carries images this updater cannot send.
    #[error("Unsupported firmware image: {reason}")]
    UnsupportedImage { reason: String },

    /// CRC checksum in the package manifest does not match the image.
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },
}

impl DfuError {
    /// Whether this error was raised before any protocol activity,
    /// from bad user input: the address, the settings or the firmware file.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DfuError::InvalidAddress { .. }
                | DfuError::EmptyPath
                | DfuError::FirmwareUnreadable { .. }
                | DfuError::InvalidSettings { .. }
                | DfuError::Zip(_)
                | DfuError::MissingFile { .. }
                | DfuError::InvalidManifest { .. }
                | DfuError::UnsupportedImage { .. }
                | DfuError::CrcMismatch { .. }
        )
    }

    /// Whether this error is an acknowledgement the device should never send.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            DfuError::BadResponseLength { .. }
                | DfuError::BadResponseOpcode { .. }
                | DfuError::DfuResponse { .. }
                | DfuError::UnexpectedResponse { .. }
        )
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DfuError::Ble(_) => "DFU-001",
            DfuError::Io(_) => "DFU-002",
            DfuError::Zip(_) => "DFU-003",
            DfuError::Json(_) => "DFU-004",
            DfuError::InvalidAddress { .. } => "DFU-010",
            DfuError::EmptyPath => "DFU-011",
            DfuError::InvalidSettings { .. } => "DFU-012",
            DfuError::FirmwareUnreadable { .. } => "DFU-013",
            DfuError::Timeout { .. } => "DFU-021",
            DfuError::DiscoveryTimeout { .. } => "DFU-022",
            DfuError::BootloaderNotReached { .. } => "DFU-023",
            DfuError::BadResponseLength { .. } => "DFU-030",
            DfuError::BadResponseOpcode { .. } => "DFU-031",
            DfuError::DfuResponse { .. } => "DFU-032",
            DfuError::UnexpectedResponse { .. } => "DFU-033",
            DfuError::InvalidState { .. } => "DFU-034",
            DfuError::MissingFile { .. } => "DFU-040",
            DfuError::InvalidManifest { .. } => "DFU-041",
            DfuError::UnsupportedImage { .. } => "DFU-042",
            DfuError::CrcMismatch { .. } => "DFU-043",
            DfuError::NoAdapter => "DFU-050",
            DfuError::DeviceDisconnected { .. } => "DFU-051",
            DfuError::ScanEnded { .. } => "DFU-052",
            DfuError::ServiceNotFound => "DFU-053",
            DfuError::CharacteristicNotFound { .. } => "DFU-054",
        }
    }
}
