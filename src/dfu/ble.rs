//! btleplug-backed DFU link.
//!
//! Scans for the target by address, connects, discovers the DFU service and
//! enables control point notifications. Whether the packet characteristic is
//! present tells application firmware apart from the bootloader.

use std::collections::HashSet;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use log::{debug, info, warn};

use super::config::{DFU_CONTROL_POINT_UUID, DFU_PACKET_UUID, DFU_SERVICE_UUID};
use super::device::{DeviceAddress, PeerInfo};
use super::error::{DfuError, DfuResult};
use super::transport::{DfuConnector, DfuLink, Endpoint, LinkEvent, TargetRole};

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Targets this connector has already connected to.
#[derive(Debug, Default)]
struct ScanHistory {
    connected: HashSet<DeviceAddress>,
}

impl ScanHistory {
    /// Whether peripherals the OS cached before the scan may be used.
    ///
    /// Once a target has been connected, its cached entry is the link that
    /// went away; only a fresh advertisement counts.
    fn accepts_cached(&self, target: &DeviceAddress) -> bool {
        !self.connected.contains(target)
    }

    fn record_connect(&mut self, target: DeviceAddress) {
        self.connected.insert(target);
    }
}

/// Connects to DFU targets through the first local BLE adapter.
pub struct BtleplugConnector {
    adapter: Adapter,
    scan_timeout: Option<Duration>,
    history: ScanHistory,
}

impl BtleplugConnector {
    /// Open the first BLE adapter. `scan_timeout` bounds each scan; `None`
    /// scans until the target shows up.
    pub async fn new(scan_timeout: Option<Duration>) -> DfuResult<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(DfuError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => debug!("Using adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            adapter,
            scan_timeout,
            history: ScanHistory::default(),
        })
    }

    /// Scan until a peripheral with `target`'s address is reported.
    ///
    /// With `include_cached` peripherals already known to the OS match too;
    /// otherwise only discovery events raised after the scan started do.
    async fn find(&self, target: &DeviceAddress, include_cached: bool) -> DfuResult<Peripheral> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        // A peer cached by the OS may never be reported again
        if include_cached {
            for peripheral in self.adapter.peripherals().await? {
                if let Some(peer) = matching_peer(&peripheral, target).await {
                    info!("Found {}", peer.display_label());
                    return Ok(peripheral);
                }
            }
        } else {
            debug!("Waiting for {} to advertise again", target);
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let peripheral = match self.adapter.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    debug!("Skipping {:?}: {}", id, e);
                    continue;
                }
            };
            if let Some(peer) = matching_peer(&peripheral, target).await {
                info!("Found {}", peer.display_label());
                return Ok(peripheral);
            }
        }

        Err(DfuError::ScanEnded {
            address: target.to_string(),
        })
    }

    async fn scan(&self, target: &DeviceAddress) -> DfuResult<Peripheral> {
        let include_cached = self.history.accepts_cached(target);
        let found = match self.scan_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.find(target, include_cached))
                .await
                .unwrap_or_else(|_| {
                    Err(DfuError::DiscoveryTimeout {
                        address: target.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }),
            None => self.find(target, include_cached).await,
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        found
    }
}

/// Peer info for `peripheral` if its address is `target`.
async fn matching_peer(peripheral: &Peripheral, target: &DeviceAddress) -> Option<PeerInfo> {
    let bytes = peripheral.address().into_inner();
    if bytes != target.bytes() {
        return None;
    }
    let address = DeviceAddress::from(bytes);
    let name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|props| props.local_name);
    Some(PeerInfo { address, name })
}

#[async_trait]
impl DfuConnector for BtleplugConnector {
    type Link = BleLink;

    async fn connect(&mut self, target: &DeviceAddress) -> DfuResult<BleLink> {
        info!("Scanning for {}", target);
        let peripheral = self.scan(target).await?;

        let events = self.adapter.events().await?;
        peripheral.connect().await?;
        self.history.record_connect(*target);
        info!("Connected to {}", target);

        peripheral.discover_services().await?;
        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == DFU_SERVICE_UUID)
            .ok_or(DfuError::ServiceNotFound)?;

        let find = |uuid: uuid::Uuid| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
        };
        let control = find(DFU_CONTROL_POINT_UUID).ok_or(DfuError::CharacteristicNotFound {
            name: "control point",
        })?;
        let packet = find(DFU_PACKET_UUID);
        let role = TargetRole::from_packet_characteristic(packet.is_some());
        debug!("Discovered DFU service, role {:?}", role);

        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(&control).await?;

        Ok(BleLink {
            id: peripheral.id(),
            peripheral,
            control,
            packet,
            role,
            notifications,
            events,
        })
    }
}

/// A connected DFU peer.
pub struct BleLink {
    id: PeripheralId,
    peripheral: Peripheral,
    control: Characteristic,
    packet: Option<Characteristic>,
    role: TargetRole,
    notifications: NotificationStream,
    events: EventStream,
}

impl BleLink {
    /// Data writes wait for the response when the characteristic allows it.
    fn packet_write_type(packet: &Characteristic) -> WriteType {
        if packet.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }
}

#[async_trait]
impl DfuLink for BleLink {
    fn role(&self) -> TargetRole {
        self.role
    }

    async fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> DfuResult<()> {
        let (characteristic, write_type) = match endpoint {
            Endpoint::ControlPoint => (&self.control, WriteType::WithResponse),
            Endpoint::Packet => {
                let packet = self
                    .packet
                    .as_ref()
                    .ok_or(DfuError::CharacteristicNotFound { name: "packet" })?;
                (packet, Self::packet_write_type(packet))
            }
        };

        self.peripheral
            .write(characteristic, data, write_type)
            .await?;
        Ok(())
    }

    async fn next_event(&mut self) -> DfuResult<LinkEvent> {
        loop {
            tokio::select! {
                notification = self.notifications.next() => match notification {
                    Some(ValueNotification { uuid, value, .. }) if uuid == DFU_CONTROL_POINT_UUID => {
                        return Ok(LinkEvent::Notification(value));
                    }
                    Some(_) => continue,
                    None => return Ok(LinkEvent::Disconnected),
                },
                event = self.events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == self.id => {
                        return Ok(LinkEvent::Disconnected);
                    }
                    Some(_) => continue,
                    None => return Ok(LinkEvent::Disconnected),
                },
            }
        }
    }

    async fn disconnect(&mut self) -> DfuResult<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn packet_char(properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: DFU_PACKET_UUID,
            service_uuid: DFU_SERVICE_UUID,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn test_cached_peripherals_ignored_after_connect() {
        let target = DeviceAddress::parse("c3:4a:1f:00:b2:7e").unwrap();
        let other = DeviceAddress::parse("c3:4a:1f:00:b2:7f").unwrap();
        let mut history = ScanHistory::default();

        assert!(history.accepts_cached(&target));

        // The application resets; its cached entry must not be reused
        history.record_connect(target);
        assert!(!history.accepts_cached(&target));
        assert!(history.accepts_cached(&other));
    }

    #[test]
    fn test_packet_write_type_follows_properties() {
        let acked = packet_char(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE);
        assert_eq!(BleLink::packet_write_type(&acked), WriteType::WithResponse);

        let unacked = packet_char(CharPropFlags::WRITE_WITHOUT_RESPONSE);
        assert_eq!(BleLink::packet_write_type(&unacked), WriteType::WithoutResponse);
    }
}
