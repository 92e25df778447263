//! Firmware reader for Nordic legacy DFU.
//!
//! Accepts either a raw application binary (`*.bin`) or a legacy
//! `nrfutil` package (`*.zip`) containing:
//! - manifest.json - Package metadata with init packet fields
//! - application binary named by the manifest
//! - init packet file (ignored; the init packet is rebuilt locally)

use std::io::Read;
use std::path::Path;

use log::info;
use serde::Deserialize;

use super::crc::image_crc16;
use super::error::{DfuError, DfuResult};
use super::packet::InitPacketParams;

/// Application image to flash. Never modified once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap image bytes. The size header carries the length as a `u32`.
    pub fn new(data: Vec<u8>) -> DfuResult<Self> {
        if u32::try_from(data.len()).is_err() {
            return Err(DfuError::UnsupportedImage {
                reason: format!("image of {} bytes exceeds 4 GiB", data.len()),
            });
        }
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length as written into the size header.
    pub fn size(&self) -> u32 {
        // Checked in `new`
        self.data.len() as u32
    }
}

/// An image plus the init packet fields a package manifest asked for.
#[derive(Debug)]
pub struct FirmwarePackage {
    pub image: FirmwareImage,
    /// `None` for raw binaries; the configured fields are used instead.
    pub init_params: Option<InitPacketParams>,
}

/// Raw manifest.json structure for deserialization.
#[derive(Debug, Deserialize)]
struct RawManifest {
    manifest: ManifestInner,
}

#[derive(Debug, Deserialize)]
struct ManifestInner {
    application: Option<ApplicationManifest>,
    softdevice: Option<serde_json::Value>,
    bootloader: Option<serde_json::Value>,
    softdevice_bootloader: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApplicationManifest {
    bin_file: String,
    #[serde(default)]
    init_packet_data: InitPacketData,
}

#[derive(Debug, Default, Deserialize)]
struct InitPacketData {
    application_version: Option<u32>,
    device_revision: Option<u16>,
    device_type: Option<u16>,
    firmware_crc16: Option<u16>,
    softdevice_req: Option<Vec<u16>>,
}

impl InitPacketData {
    fn to_params(&self) -> InitPacketParams {
        let defaults = InitPacketParams::default();
        InitPacketParams {
            device_type: self.device_type.unwrap_or(defaults.device_type),
            device_revision: self.device_revision.unwrap_or(defaults.device_revision),
            application_version: self
                .application_version
                .unwrap_or(defaults.application_version),
            softdevice_req: self
                .softdevice_req
                .clone()
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.softdevice_req),
        }
    }
}

/// Read a firmware file, dispatching on its extension.
pub fn read_firmware<P: AsRef<Path>>(path: P) -> DfuResult<FirmwarePackage> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(DfuError::EmptyPath);
    }

    let is_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

    if is_zip {
        read_firmware_zip(path)
    } else {
        let data = std::fs::read(path).map_err(|source| unreadable(path, source))?;
        let image = FirmwareImage::new(data)?;
        info!("Read {} bytes from {}", image.len(), path.display());
        Ok(FirmwarePackage {
            image,
            init_params: None,
        })
    }
}

fn unreadable(path: &Path, source: std::io::Error) -> DfuError {
    DfuError::FirmwareUnreadable {
        path: path.display().to_string(),
        source,
    }
}

/// Read and parse a legacy firmware.zip package.
pub fn read_firmware_zip<P: AsRef<Path>>(path: P) -> DfuResult<FirmwarePackage> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| unreadable(path, source))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let application = read_manifest(&mut archive)?;
    let data = read_file_from_zip(&mut archive, &application.bin_file)?;
    let image = FirmwareImage::new(data)?;

    if let Some(expected) = application.init_packet_data.firmware_crc16 {
        let actual = image_crc16(image.as_bytes());
        if expected != actual {
            return Err(DfuError::CrcMismatch { expected, actual });
        }
    }

    info!(
        "Read {} bytes of {} from {}",
        image.len(),
        application.bin_file,
        path.display()
    );

    Ok(FirmwarePackage {
        image,
        init_params: Some(application.init_packet_data.to_params()),
    })
}

/// Read manifest.json and return its application entry.
fn read_manifest(archive: &mut zip::ZipArchive<std::fs::File>) -> DfuResult<ApplicationManifest> {
    let mut manifest_file = archive.by_name("manifest.json").map_err(|_| {
        DfuError::MissingFile {
            filename: "manifest.json".to_string(),
        }
    })?;

    let mut contents = String::new();
    manifest_file.read_to_string(&mut contents)?;

    let raw: RawManifest =
        serde_json::from_str(&contents).map_err(|e| DfuError::InvalidManifest {
            reason: format!("manifest.json: {}", e),
        })?;
    let inner = raw.manifest;

    if inner.softdevice.is_some()
        || inner.bootloader.is_some()
        || inner.softdevice_bootloader.is_some()
    {
        return Err(DfuError::UnsupportedImage {
            reason: "only application packages are supported".into(),
        });
    }

    inner.application.ok_or_else(|| DfuError::InvalidManifest {
        reason: "no application entry".into(),
    })
}

/// Read a file from the zip archive by name.
fn read_file_from_zip(
    archive: &mut zip::ZipArchive<std::fs::File>,
    name: &str,
) -> DfuResult<Vec<u8>> {
    let mut file = archive.by_name(name).map_err(|_| DfuError::MissingFile {
        filename: name.to_string(),
    })?;

    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;

    Ok(data)
}
