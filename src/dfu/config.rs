//! Configuration constants and runtime options for the Nordic legacy BLE DFU protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{DfuError, DfuResult};
use super::packet::InitPacketParams;

// ============================================================================
// GATT Identifiers
// ============================================================================

/// Legacy DFU service.
pub const DFU_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001530_1212_efde_1523_785feabcd123);

/// DFU control point characteristic (commands out, responses in via notify).
pub const DFU_CONTROL_POINT_UUID: Uuid = Uuid::from_u128(0x00001531_1212_efde_1523_785feabcd123);

/// DFU packet characteristic (size header, init packet, firmware data).
///
/// Only exposed by the bootloader; the application-side service lacks it.
pub const DFU_PACKET_UUID: Uuid = Uuid::from_u128(0x00001532_1212_efde_1523_785feabcd123);

// ============================================================================
// Transport
// ============================================================================

/// Default ATT MTU negotiated by legacy DFU bootloaders.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// ATT write header (opcode + handle) taken out of every write.
pub const ATT_HEADER_SIZE: u16 = 3;

/// Upload progress is reported after this many chunks.
pub const PROGRESS_INTERVAL_CHUNKS: usize = 10;

// ============================================================================
// DFU Opcodes (Legacy DFU Protocol)
// ============================================================================

/// Legacy DFU control point opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuOpcode {
    /// Start DFU with image type; sizes follow on the packet characteristic
    StartDfu = 0x01,
    /// Initialize DFU parameters (init packet follows on the packet characteristic)
    InitDfuParams = 0x02,
    /// Receive firmware image (data chunks)
    ReceiveFirmwareImage = 0x03,
    /// Validate the received firmware
    ValidateFirmware = 0x04,
    /// Activate firmware and reset device
    ActivateAndReset = 0x05,
    /// Response from bootloader
    Response = 0x10,
}

impl DfuOpcode {
    /// Opcodes a device may echo back in a response.
    pub fn from_request_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(DfuOpcode::StartDfu),
            0x02 => Some(DfuOpcode::InitDfuParams),
            0x03 => Some(DfuOpcode::ReceiveFirmwareImage),
            0x04 => Some(DfuOpcode::ValidateFirmware),
            _ => None,
        }
    }
}

/// DFU image type (what firmware component is being updated).
///
/// Sent as the sub-parameter of the StartDfu command. Only
/// [`DfuImageType::Application`] is ever sent.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuImageType {
    SoftDevice = 0x01,
    Bootloader = 0x02,
    SoftDeviceBootloader = 0x03,
    Application = 0x04,
}

/// Sub-parameter of the InitDfuParams command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitPhase {
    Begin = 0x00,
    End = 0x01,
}

/// DFU response status codes from the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuResponseStatus {
    Success = 0x01,
    InvalidState = 0x02,
    NotSupported = 0x03,
    DataSizeExceedsLimit = 0x04,
    CrcError = 0x05,
    OperationFailed = 0x06,
}

impl DfuResponseStatus {
    /// Parse a status code from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(DfuResponseStatus::Success),
            0x02 => Some(DfuResponseStatus::InvalidState),
            0x03 => Some(DfuResponseStatus::NotSupported),
            0x04 => Some(DfuResponseStatus::DataSizeExceedsLimit),
            0x05 => Some(DfuResponseStatus::CrcError),
            0x06 => Some(DfuResponseStatus::OperationFailed),
            _ => None,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            DfuResponseStatus::Success => "Operation successful",
            DfuResponseStatus::InvalidState => "Invalid state for this operation",
            DfuResponseStatus::NotSupported => "Operation not supported",
            DfuResponseStatus::DataSizeExceedsLimit => "Data size exceeds limit",
            DfuResponseStatus::CrcError => "CRC validation failed",
            DfuResponseStatus::OperationFailed => "Operation failed",
        }
    }
}

// ============================================================================
// Runtime Options
// ============================================================================

/// Tunable options for one update run.
///
/// Every field has a default so a partial JSON settings file is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DfuConfig {
    /// ATT MTU of the link; each write carries `att_mtu - 3` bytes.
    pub att_mtu: u16,
    /// Bound on each acknowledgement wait. `None` waits forever.
    pub ack_timeout_ms: Option<u64>,
    /// Bound on scanning for the target. `None` scans until found.
    pub scan_timeout_ms: Option<u64>,
    /// Init packet device type (0xFFFF = any).
    pub device_type: u16,
    /// Init packet device revision (0xFFFF = any).
    pub device_revision: u16,
    /// Init packet application version (0xFFFFFFFF = any).
    pub application_version: u32,
    /// Accepted SoftDevice firmware IDs (0xFFFE = any).
    pub softdevice_req: Vec<u16>,
    /// Application-to-bootloader resets tolerated in one run.
    pub max_resets: u32,
}

impl Default for DfuConfig {
    fn default() -> Self {
        let params = InitPacketParams::default();
        Self {
            att_mtu: DEFAULT_ATT_MTU,
            ack_timeout_ms: None,
            scan_timeout_ms: None,
            device_type: params.device_type,
            device_revision: params.device_revision,
            application_version: params.application_version,
            softdevice_req: params.softdevice_req,
            max_resets: 1,
        }
    }
}

impl DfuConfig {
    /// Check the options for values the protocol cannot work with.
    pub fn validate(&self) -> DfuResult<()> {
        if self.att_mtu <= ATT_HEADER_SIZE {
            return Err(DfuError::InvalidSettings {
                reason: format!(
                    "attMtu must be larger than {} (got {})",
                    ATT_HEADER_SIZE, self.att_mtu
                ),
            });
        }
        if self.softdevice_req.is_empty() {
            return Err(DfuError::InvalidSettings {
                reason: "softdeviceReq must list at least one entry".into(),
            });
        }
        if self.softdevice_req.len() > usize::from(u16::MAX) {
            return Err(DfuError::InvalidSettings {
                reason: "softdeviceReq has too many entries".into(),
            });
        }
        Ok(())
    }

    /// Bytes of firmware carried by one data write.
    pub fn max_payload(&self) -> usize {
        usize::from(self.att_mtu.saturating_sub(ATT_HEADER_SIZE))
    }

    /// Acknowledgement wait bound, if any.
    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    /// Scan bound, if any.
    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }

    /// Init packet fields described by these options.
    pub fn init_params(&self) -> InitPacketParams {
        InitPacketParams {
            device_type: self.device_type,
            device_revision: self.device_revision,
            application_version: self.application_version,
            softdevice_req: self.softdevice_req.clone(),
        }
    }

    /// Replace the init packet fields, e.g. with values from a package manifest.
    pub fn with_init_params(mut self, params: InitPacketParams) -> Self {
        self.device_type = params.device_type;
        self.device_revision = params.device_revision;
        self.application_version = params.application_version;
        self.softdevice_req = params.softdevice_req;
        self
    }
}
