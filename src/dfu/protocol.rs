//! Legacy BLE DFU protocol driver.
//!
//! Runs the [`DfuStateMachine`] over a [`DfuLink`]: every step is written and
//! completed before the next event is awaited, so there is never more than
//! one write or acknowledgement in flight.
//!
//! 1. StartDfu + image size
//! 2. InitDfuParams (begin) + init packet + InitDfuParams (end)
//! 3. ReceiveFirmwareImage + firmware chunks
//! 4. Validate
//! 5. Activate and reset
//!
//! A peer still running its application only gets StartDfu, which resets it
//! into the bootloader; the driver then reconnects and starts over.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::chunker::{chunk_count, firmware_chunks};
use super::config::{DfuConfig, PROGRESS_INTERVAL_CHUNKS};
use super::device::DeviceAddress;
use super::error::{DfuError, DfuResult};
use super::firmware_reader::FirmwareImage;
use super::packet::{build_size_header, ControlCommand, InitPacket};
use super::state_machine::{DfuEvent, DfuState, DfuStateMachine, DfuStep};
use super::transport::{DfuConnector, DfuLink, Endpoint, LinkEvent, TargetRole};

/// DFU progress stages for operator feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data")]
pub enum DfuStage {
    /// Scanning for and connecting to the target.
    Connecting { address: String },
    /// Link ready; role found during discovery.
    Connected { role: TargetRole },
    /// Asking the application to reset into its bootloader.
    EnteringBootloader,
    /// Waiting for the bootloader to advertise.
    WaitingForBootloader,
    /// Starting DFU transfer.
    Starting,
    /// Sending init packet.
    SendingInit,
    /// Uploading firmware data.
    Uploading { sent: usize, total: usize },
    /// Device is validating the image.
    Validating,
    /// Device is activating the image.
    Activating,
    /// DFU process complete.
    Complete,
    /// Debug log message.
    Log { message: String },
}

impl DfuStage {
    /// Get a percentage estimate for this stage.
    pub fn percent(&self) -> f32 {
        match self {
            DfuStage::Connecting { .. } => 0.0,
            DfuStage::Connected { .. } => 2.0,
            DfuStage::EnteringBootloader => 3.0,
            DfuStage::WaitingForBootloader => 5.0,
            DfuStage::Starting => 8.0,
            DfuStage::SendingInit => 10.0,
            DfuStage::Uploading { sent, total } => {
                if *total == 0 {
                    12.0
                } else {
                    12.0 + (*sent as f32 / *total as f32) * 80.0
                }
            }
            DfuStage::Validating => 94.0,
            DfuStage::Activating => 97.0,
            DfuStage::Complete => 100.0,
            // Log messages don't affect progress percentage
            DfuStage::Log { .. } => -1.0,
        }
    }

    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            DfuStage::Connecting { address } => format!("Connecting to {}...", address),
            DfuStage::Connected { role } => match role {
                TargetRole::Application => "Connected to application".into(),
                TargetRole::Bootloader => "Connected to bootloader".into(),
            },
            DfuStage::EnteringBootloader => "Resetting target to bootloader...".into(),
            DfuStage::WaitingForBootloader => "Waiting for bootloader...".into(),
            DfuStage::Starting => "Starting DFU...".into(),
            DfuStage::SendingInit => "Sending DFU parameters...".into(),
            DfuStage::Uploading { sent, total } => {
                let percent = if *total == 0 {
                    100
                } else {
                    (sent * 100) / total
                };
                format!("Uploading firmware... {}%", percent)
            }
            DfuStage::Validating => "Validating image...".into(),
            DfuStage::Activating => "Activating image...".into(),
            DfuStage::Complete => "Update complete!".into(),
            DfuStage::Log { message } => message.clone(),
        }
    }
}

/// Everything one update run needs, prepared before any radio activity.
///
/// The image is shared read-only by the init packet builder and the chunker.
#[derive(Debug)]
pub struct UpdateSession {
    image: FirmwareImage,
    init_packet: InitPacket,
    size_header: Vec<u8>,
    max_payload: usize,
    ack_timeout: Option<Duration>,
    max_resets: u32,
}

impl UpdateSession {
    /// Build the init packet and size header for `image`.
    pub fn new(image: FirmwareImage, config: &DfuConfig) -> DfuResult<Self> {
        config.validate()?;
        if image.is_empty() {
            warn!("Firmware image is empty; only the control sequence will be sent");
        }

        let init_packet = InitPacket::build(image.as_bytes(), &config.init_params());
        let size_header = build_size_header(image.size());
        let max_payload = config.max_payload();
        info!(
            "Firmware will be sent in {} writes of up to {} bytes",
            chunk_count(image.len(), max_payload),
            max_payload
        );

        Ok(Self {
            image,
            init_packet,
            size_header,
            max_payload,
            ack_timeout: config.ack_timeout(),
            max_resets: config.max_resets,
        })
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    pub fn init_packet(&self) -> &InitPacket {
        &self.init_packet
    }
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Activate was sent.
    Complete,
    /// The application reset into its bootloader; reconnect.
    ResetToBootloader,
}

/// Drives one connection through the state machine.
pub struct DfuProtocol<'a, L: DfuLink, F: Fn(DfuStage)> {
    link: &'a mut L,
    session: &'a UpdateSession,
    machine: DfuStateMachine,
    on_progress: &'a F,
}

impl<'a, L: DfuLink, F: Fn(DfuStage)> DfuProtocol<'a, L, F> {
    pub fn new(link: &'a mut L, session: &'a UpdateSession, on_progress: &'a F) -> Self {
        Self {
            link,
            session,
            machine: DfuStateMachine::new(),
            on_progress,
        }
    }

    #[cfg(test)]
    fn state(&self) -> DfuState {
        self.machine.state()
    }

    /// Run the protocol on this link until activation or reset.
    ///
    /// With `allow_reset` false an application-role peer fails the run
    /// instead of being reset again.
    pub async fn run(&mut self, allow_reset: bool) -> DfuResult<RunOutcome> {
        let role = self.link.role();
        (self.on_progress)(DfuStage::Connected { role });
        self.dispatch(DfuEvent::LinkReady(role)).await?;

        match role {
            TargetRole::Application if !allow_reset => {
                return Err(DfuError::BootloaderNotReached {
                    resets: self.session.max_resets,
                });
            }
            TargetRole::Application => (self.on_progress)(DfuStage::EnteringBootloader),
            TargetRole::Bootloader => (self.on_progress)(DfuStage::Starting),
        }
        self.dispatch(DfuEvent::Begin).await?;

        loop {
            match self.machine.state() {
                DfuState::Done => {
                    if let Err(e) = self.link.disconnect().await {
                        debug!("Disconnect after activation failed: {}", e);
                    }
                    return Ok(RunOutcome::Complete);
                }
                DfuState::Idle => return Ok(RunOutcome::ResetToBootloader),
                _ => {}
            }

            let event = self.next_event().await?;
            self.dispatch(event).await?;
        }
    }

    /// Wait for the next link event, bounded by the configured timeout.
    async fn next_event(&mut self) -> DfuResult<DfuEvent> {
        let event = match self.session.ack_timeout {
            Some(timeout) => {
                let operation = self.machine.state().to_string();
                tokio::time::timeout(timeout, self.link.next_event())
                    .await
                    .map_err(|_| DfuError::Timeout { operation })??
            }
            None => self.link.next_event().await?,
        };

        Ok(match event {
            LinkEvent::Notification(data) => {
                debug!("Notification: {:02x?}", data);
                DfuEvent::Notification(data)
            }
            LinkEvent::Disconnected => {
                info!("Disconnected while {}", self.machine.state());
                DfuEvent::Disconnected
            }
        })
    }

    /// Feed an event to the machine and perform the resulting steps.
    async fn dispatch(&mut self, event: DfuEvent) -> DfuResult<()> {
        let steps = self.machine.handle(event)?;
        for step in steps {
            if let Err(e) = self.execute(step).await {
                self.machine.fail(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn execute(&mut self, step: DfuStep) -> DfuResult<()> {
        match step {
            DfuStep::Control(command) => self.send_command(command).await,
            DfuStep::SizeHeader => {
                self.link
                    .write(Endpoint::Packet, &self.session.size_header)
                    .await?;
                info!("Send img size ({} bytes)", self.session.image.len());
                Ok(())
            }
            DfuStep::InitPacket => {
                (self.on_progress)(DfuStage::SendingInit);
                self.link
                    .write(Endpoint::Packet, self.session.init_packet.as_bytes())
                    .await?;
                info!("Sent DFU Parameters");
                Ok(())
            }
            DfuStep::Firmware => self.send_firmware().await,
        }
    }

    async fn send_command(&mut self, command: ControlCommand) -> DfuResult<()> {
        match command {
            ControlCommand::Validate => (self.on_progress)(DfuStage::Validating),
            ControlCommand::Activate => (self.on_progress)(DfuStage::Activating),
            _ => {}
        }

        self.link
            .write(Endpoint::ControlPoint, &command.to_bytes())
            .await?;

        match (command, self.machine.role()) {
            (ControlCommand::StartDfu(_), Some(TargetRole::Application)) => {
                info!("Resetting Target to Bootloader")
            }
            _ => info!("{}", command.name()),
        }
        Ok(())
    }

    /// Stream the image, one completed write per chunk.
    async fn send_firmware(&mut self) -> DfuResult<()> {
        let session = self.session;
        let total = session.image.len();
        let chunks = firmware_chunks(session.image.as_bytes(), session.max_payload)?;
        let count = chunks.len();
        let mut sent = 0;

        (self.on_progress)(DfuStage::Uploading { sent, total });

        for (index, chunk) in chunks.enumerate() {
            self.link.write(Endpoint::Packet, chunk).await?;
            sent += chunk.len();

            let written = index + 1;
            if written % PROGRESS_INTERVAL_CHUNKS == 0 || written == count {
                debug!("Sent {}/{} chunks ({}/{} bytes)", written, count, sent, total);
                (self.on_progress)(DfuStage::Uploading { sent, total });
            }
        }

        info!("Sent {} bytes of firmware in {} writes", sent, count);
        Ok(())
    }
}

/// Update the device at `target` with the session's image.
///
/// Connects through `connector`, resets an application-role peer into its
/// bootloader when needed, and returns once Activate has been written.
/// No step is retried: the first error ends the run.
pub async fn upload_firmware<C, F>(
    connector: &mut C,
    target: &DeviceAddress,
    session: &UpdateSession,
    on_progress: F,
) -> DfuResult<()>
where
    C: DfuConnector,
    F: Fn(DfuStage),
{
    let mut resets = 0;

    loop {
        on_progress(DfuStage::Connecting {
            address: target.to_string(),
        });
        let mut link = connector.connect(target).await?;

        let outcome = {
            let mut protocol = DfuProtocol::new(&mut link, session, &on_progress);
            protocol.run(resets < session.max_resets).await?
        };

        match outcome {
            RunOutcome::Complete => {
                on_progress(DfuStage::Complete);
                return Ok(());
            }
            RunOutcome::ResetToBootloader => {
                resets += 1;
                let message = format!(
                    "{} reset into bootloader ({}/{}), rescanning",
                    target, resets, session.max_resets
                );
                warn!("{}", message);
                on_progress(DfuStage::Log { message });
                on_progress(DfuStage::WaitingForBootloader);
            }
        }
    }
}
