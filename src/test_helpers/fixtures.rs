use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dfu::config::DfuOpcode;
use crate::dfu::device::DeviceAddress;
use crate::dfu::error::{DfuError, DfuResult};
use crate::dfu::packet::Acknowledgement;
use crate::dfu::transport::{DfuConnector, DfuLink, Endpoint, LinkEvent, TargetRole};

/// Success response for `request`.
pub fn ack(request: DfuOpcode) -> Vec<u8> {
    Acknowledgement { request }.to_bytes()
}

/// The four responses a bootloader sends during a successful update.
pub fn bootloader_acks() -> Vec<Vec<u8>> {
    vec![
        ack(DfuOpcode::StartDfu),
        ack(DfuOpcode::InitDfuParams),
        ack(DfuOpcode::ReceiveFirmwareImage),
        ack(DfuOpcode::ValidateFirmware),
    ]
}

/// Writes recorded across every link of a test, in order.
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<(Endpoint, Vec<u8>)>>>);

impl WriteLog {
    pub fn writes(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, endpoint: Endpoint, data: &[u8]) {
        self.0.lock().unwrap().push((endpoint, data.to_vec()));
    }
}

/// In-memory link replaying canned notifications.
///
/// Once the script is drained the link reports a disconnect, or never
/// answers again when built with [`ScriptedLink::stall_when_drained`].
pub struct ScriptedLink {
    role: TargetRole,
    log: WriteLog,
    notifications: VecDeque<Vec<u8>>,
    stall: bool,
    /// Writes accepted before every further write fails.
    write_budget: Option<usize>,
    pub disconnected: bool,
}

impl ScriptedLink {
    pub fn bootloader(log: &WriteLog, notifications: Vec<Vec<u8>>) -> Self {
        Self {
            role: TargetRole::Bootloader,
            log: log.clone(),
            notifications: notifications.into(),
            stall: false,
            write_budget: None,
            disconnected: false,
        }
    }

    /// An application that resets (disconnects) as soon as DFU is started.
    pub fn application(log: &WriteLog) -> Self {
        Self {
            role: TargetRole::Application,
            ..Self::bootloader(log, Vec::new())
        }
    }

    pub fn stall_when_drained(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Accept `writes` writes, then fail the rest as a dropped link would.
    pub fn fail_writes_after(mut self, writes: usize) -> Self {
        self.write_budget = Some(writes);
        self
    }
}

#[async_trait]
impl DfuLink for ScriptedLink {
    fn role(&self) -> TargetRole {
        self.role
    }

    async fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> DfuResult<()> {
        if self.disconnected || self.write_budget == Some(0) {
            return Err(DfuError::DeviceDisconnected {
                operation: "write".into(),
            });
        }
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= 1;
        }
        self.log.push(endpoint, data);
        Ok(())
    }

    async fn next_event(&mut self) -> DfuResult<LinkEvent> {
        match self.notifications.pop_front() {
            Some(data) => Ok(LinkEvent::Notification(data)),
            None if self.stall => std::future::pending().await,
            None => Ok(LinkEvent::Disconnected),
        }
    }

    async fn disconnect(&mut self) -> DfuResult<()> {
        self.disconnected = true;
        Ok(())
    }
}

/// Hands out prepared links in order, one per connect.
pub struct FakeConnector {
    links: VecDeque<ScriptedLink>,
    pub connects: usize,
}

impl FakeConnector {
    pub fn new(links: Vec<ScriptedLink>) -> Self {
        Self {
            links: links.into(),
            connects: 0,
        }
    }
}

#[async_trait]
impl DfuConnector for FakeConnector {
    type Link = ScriptedLink;

    async fn connect(&mut self, target: &DeviceAddress) -> DfuResult<ScriptedLink> {
        self.connects += 1;
        self.links.pop_front().ok_or_else(|| DfuError::ScanEnded {
            address: target.to_string(),
        })
    }
}
