//! Legacy DFU packet encoding.
//!
//! Control point commands, device responses, and the two records written to
//! the packet characteristic before the firmware itself: the image size
//! header and the init packet. All multi-byte fields are little-endian.

use log::info;

use super::config::{DfuImageType, DfuOpcode, DfuResponseStatus, InitPhase};
use super::crc::image_crc16;
use super::error::{DfuError, DfuResult};

/// Wildcard device type / revision accepted by any bootloader.
pub const ANY_DEVICE: u16 = 0xFFFF;

/// Wildcard application version.
pub const ANY_APPLICATION_VERSION: u32 = 0xFFFF_FFFF;

/// SoftDevice requirement matching any installed SoftDevice.
pub const ANY_SOFTDEVICE: u16 = 0xFFFE;

/// Size of the image size header (SoftDevice, bootloader, application).
pub const SIZE_HEADER_LEN: usize = 12;

/// Length of an acknowledgement notification.
pub const RESPONSE_LEN: usize = 3;

// ============================================================================
// Little-endian helpers
// ============================================================================

/// Append `value` to `buf`, low byte first.
pub fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append `value` to `buf`, low byte first.
pub fn put_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Read a little-endian `u16` at `offset`, if the buffer is long enough.
#[cfg(test)]
pub fn get_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a little-endian `u32` at `offset`, if the buffer is long enough.
#[cfg(test)]
pub fn get_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ============================================================================
// Control point commands
// ============================================================================

/// A command written to the DFU control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start DFU for the given image type. Sizes follow on the packet characteristic.
    StartDfu(DfuImageType),
    /// Bracket the init packet written to the packet characteristic.
    InitParams(InitPhase),
    /// Firmware data follows on the packet characteristic.
    ReceiveFirmware,
    /// Ask the bootloader to check the received image.
    Validate,
    /// Activate the new image and reset.
    Activate,
}

impl ControlCommand {
    /// Opcode sent as the first byte.
    pub fn opcode(&self) -> DfuOpcode {
        match self {
            ControlCommand::StartDfu(_) => DfuOpcode::StartDfu,
            ControlCommand::InitParams(_) => DfuOpcode::InitDfuParams,
            ControlCommand::ReceiveFirmware => DfuOpcode::ReceiveFirmwareImage,
            ControlCommand::Validate => DfuOpcode::ValidateFirmware,
            ControlCommand::Activate => DfuOpcode::ActivateAndReset,
        }
    }

    /// Wire bytes: opcode plus the optional one-byte sub-parameter.
    pub fn to_bytes(&self) -> Vec<u8> {
        let opcode = self.opcode() as u8;
        match self {
            ControlCommand::StartDfu(image_type) => vec![opcode, *image_type as u8],
            ControlCommand::InitParams(phase) => vec![opcode, *phase as u8],
            _ => vec![opcode],
        }
    }

    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::StartDfu(_) => "Start DFU",
            ControlCommand::InitParams(InitPhase::Begin) => "Init DFU Parameters",
            ControlCommand::InitParams(InitPhase::End) => "Finish DFU Parameters",
            ControlCommand::ReceiveFirmware => "Receive firmware image",
            ControlCommand::Validate => "Validate image",
            ControlCommand::Activate => "Activate image",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A successful response notification from the control point.
///
/// Format: `[0x10, request_opcode, status]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// The request this response answers.
    pub request: DfuOpcode,
}

impl Acknowledgement {
    /// Parse a notification, rejecting anything but a success response to a
    /// request that gets one.
    pub fn parse(data: &[u8]) -> DfuResult<Self> {
        if data.len() != RESPONSE_LEN {
            return Err(DfuError::BadResponseLength { length: data.len() });
        }
        if data[0] != DfuOpcode::Response as u8 {
            return Err(DfuError::BadResponseOpcode { opcode: data[0] });
        }
        if data[2] != DfuResponseStatus::Success as u8 {
            let message = DfuResponseStatus::from_byte(data[2])
                .map(|status| status.description().to_string())
                .unwrap_or_else(|| format!("Unknown status 0x{:02X}", data[2]));
            return Err(DfuError::DfuResponse {
                code: data[2],
                message,
            });
        }

        let request =
            DfuOpcode::from_request_byte(data[1]).ok_or_else(|| DfuError::UnexpectedResponse {
                opcode: data[1],
                state: "parsing response".to_string(),
            })?;

        Ok(Self { request })
    }

    /// Encode a success response. Used to script devices in tests.
    #[cfg(test)]
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![
            DfuOpcode::Response as u8,
            self.request as u8,
            DfuResponseStatus::Success as u8,
        ]
    }
}

// ============================================================================
// Size header
// ============================================================================

/// Build the image size header for an application-only update.
///
/// Layout: SoftDevice size, bootloader size, application size (u32 LE each).
/// Only the application field is ever non-zero.
pub fn build_size_header(app_size: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(SIZE_HEADER_LEN);
    put_u32_le(&mut data, 0);
    put_u32_le(&mut data, 0);
    put_u32_le(&mut data, app_size);
    data
}

// ============================================================================
// Init packet
// ============================================================================

/// Fields of the init packet that describe which devices accept the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPacketParams {
    pub device_type: u16,
    pub device_revision: u16,
    pub application_version: u32,
    pub softdevice_req: Vec<u16>,
}

impl Default for InitPacketParams {
    fn default() -> Self {
        Self {
            device_type: ANY_DEVICE,
            device_revision: ANY_DEVICE,
            application_version: ANY_APPLICATION_VERSION,
            softdevice_req: vec![ANY_SOFTDEVICE],
        }
    }
}

/// Init packet sent between the two InitParams commands.
///
/// Layout:
/// - device type (u16)
/// - device revision (u16)
/// - application version (u32)
/// - SoftDevice requirement count (u16) followed by that many u16 IDs
/// - image CRC16 (u16)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPacket {
    bytes: Vec<u8>,
    crc: u16,
}

impl InitPacket {
    /// Build the init packet for `image`, computing its CRC16.
    pub fn build(image: &[u8], params: &InitPacketParams) -> Self {
        let crc = image_crc16(image);
        info!("image size {}", image.len());
        info!("calculated crc of firmware: 0x{:04x}", crc);

        let mut bytes = Vec::with_capacity(12 + 2 * params.softdevice_req.len());
        put_u16_le(&mut bytes, params.device_type);
        put_u16_le(&mut bytes, params.device_revision);
        put_u32_le(&mut bytes, params.application_version);
        // Entry count is validated to fit a u16 when options are loaded
        put_u16_le(&mut bytes, params.softdevice_req.len() as u16);
        for &softdevice in &params.softdevice_req {
            put_u16_le(&mut bytes, softdevice);
        }
        put_u16_le(&mut bytes, crc);

        Self { bytes, crc }
    }

    /// Encoded packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// CRC16 of the image this packet describes.
    #[cfg(test)]
    pub fn crc(&self) -> u16 {
        self.crc
    }
}
