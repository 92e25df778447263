//! Transport layer for DFU communication.
//!
//! Provides a trait-based abstraction over the BLE stack, enabling both real
//! hardware (see [`super::ble`]) and scripted or mocked links in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use super::device::DeviceAddress;
use super::error::DfuResult;

/// Which firmware the connected peer is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetRole {
    /// Application firmware: DFU service without a packet characteristic.
    /// Starting DFU resets the device into its bootloader.
    Application,
    /// Bootloader: DFU service with a packet characteristic.
    Bootloader,
}

impl TargetRole {
    /// Role implied by whether the packet characteristic was found.
    pub fn from_packet_characteristic(present: bool) -> Self {
        if present {
            TargetRole::Bootloader
        } else {
            TargetRole::Application
        }
    }
}

/// DFU characteristic a write is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Control point: opcoded commands.
    ControlPoint,
    /// Packet: size header, init packet and firmware data.
    Packet,
}

/// Something the link reports while the client waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Control point notification.
    Notification(Vec<u8>),
    /// The peer went away.
    Disconnected,
}

/// A connected DFU peer with its characteristics discovered and control
/// point notifications already enabled.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DfuLink: Send {
    /// Role determined during characteristic discovery.
    fn role(&self) -> TargetRole;

    /// Write `data` to `endpoint`, returning once the write completed.
    async fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> DfuResult<()>;

    /// Wait for the next notification or disconnect.
    async fn next_event(&mut self) -> DfuResult<LinkEvent>;

    /// Drop the connection.
    async fn disconnect(&mut self) -> DfuResult<()>;
}

/// Finds a peer by address and hands back a ready [`DfuLink`].
#[async_trait]
pub trait DfuConnector: Send {
    type Link: DfuLink;

    /// Scan for `target`, connect, discover the DFU service and subscribe
    /// to control point notifications.
    async fn connect(&mut self, target: &DeviceAddress) -> DfuResult<Self::Link>;
}
