//! Legacy DFU state machine.
//!
//! Pure transition logic: events in, steps out. The caller performs every
//! step (a write, or streaming the image) before delivering the next event,
//! so the legal sequence can be exercised without a radio.
//!
//! ```text
//! Idle -> Connected -> ParamsInit -> Transferring -> Validating -> Activating -> Done
//!              \
//!               -> AwaitingReset -> Idle        (application role)
//! ```
//! Any protocol or transport error moves to `Failed`.

use std::fmt;

use log::{error, info};

use super::config::{DfuImageType, DfuOpcode, InitPhase};
use super::error::{DfuError, DfuResult};
use super::packet::{Acknowledgement, ControlCommand};
use super::transport::TargetRole;

/// Where the update currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    Idle,
    Connected,
    /// StartDfu sent to an application; waiting for it to drop the link.
    AwaitingReset,
    /// StartDfu and size header sent; waiting for the StartDfu response.
    ParamsInit,
    /// Init packet sent; waiting for the InitDfuParams response.
    Transferring,
    /// Firmware sent; waiting for the ReceiveFirmwareImage response.
    Validating,
    /// Validate sent; waiting for the ValidateFirmware response.
    Activating,
    Done,
    Failed,
}

impl DfuState {
    /// Request whose success response moves this state forward.
    fn awaited_response(self) -> Option<DfuOpcode> {
        match self {
            DfuState::ParamsInit => Some(DfuOpcode::StartDfu),
            DfuState::Transferring => Some(DfuOpcode::InitDfuParams),
            DfuState::Validating => Some(DfuOpcode::ReceiveFirmwareImage),
            DfuState::Activating => Some(DfuOpcode::ValidateFirmware),
            _ => None,
        }
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DfuState::Idle => "idle",
            DfuState::Connected => "connected",
            DfuState::AwaitingReset => "waiting for reset to bootloader",
            DfuState::ParamsInit => "starting DFU",
            DfuState::Transferring => "sending init packet",
            DfuState::Validating => "receiving firmware",
            DfuState::Activating => "validating firmware",
            DfuState::Done => "done",
            DfuState::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuEvent {
    /// Connected, characteristics found, notifications enabled.
    LinkReady(TargetRole),
    /// Start the update on the ready link.
    Begin,
    /// Control point notification.
    Notification(Vec<u8>),
    /// Peer disconnected.
    Disconnected,
}

/// Output of a transition, performed in order by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuStep {
    /// Write a command to the control point.
    Control(ControlCommand),
    /// Write the image size header to the packet characteristic.
    SizeHeader,
    /// Write the init packet to the packet characteristic.
    InitPacket,
    /// Write every image chunk to the packet characteristic, in order.
    Firmware,
}

/// Legacy DFU client state machine.
#[derive(Debug)]
pub struct DfuStateMachine {
    state: DfuState,
    role: Option<TargetRole>,
}

impl Default for DfuStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DfuStateMachine {
    pub fn new() -> Self {
        Self {
            state: DfuState::Idle,
            role: None,
        }
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    /// Role of the current peer, once the link is ready.
    pub fn role(&self) -> Option<TargetRole> {
        self.role
    }

    /// Apply `event`, returning the steps to perform.
    ///
    /// On error the machine is left in [`DfuState::Failed`] and accepts no
    /// further events.
    pub fn handle(&mut self, event: DfuEvent) -> DfuResult<Vec<DfuStep>> {
        match self.transition(event) {
            Ok((next, steps)) => {
                if next != self.state {
                    info!("DFU state: {} -> {}", self.state, next);
                }
                self.state = next;
                Ok(steps)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Record an error raised while performing a step, such as a failed
    /// write. The machine accepts no further events afterwards.
    pub fn fail(&mut self, error: &DfuError) {
        error!("DFU failed while {}: {}", self.state, error);
        self.state = DfuState::Failed;
    }

    fn transition(&mut self, event: DfuEvent) -> DfuResult<(DfuState, Vec<DfuStep>)> {
        use DfuState::*;

        match (self.state, event) {
            (Failed, _) => Err(DfuError::InvalidState {
                state: self.state.to_string(),
            }),

            (Idle, DfuEvent::LinkReady(role)) => {
                self.role = Some(role);
                Ok((Connected, Vec::new()))
            }

            (Connected, DfuEvent::Begin) => {
                let start = DfuStep::Control(ControlCommand::StartDfu(DfuImageType::Application));
                match self.role {
                    Some(TargetRole::Bootloader) => Ok((ParamsInit, vec![start, DfuStep::SizeHeader])),
                    _ => Ok((AwaitingReset, vec![start])),
                }
            }

            (AwaitingReset, DfuEvent::Disconnected) => {
                self.role = None;
                Ok((Idle, Vec::new()))
            }

            // The device resets itself after activation.
            (Done, DfuEvent::Disconnected) => Ok((Done, Vec::new())),

            (state, DfuEvent::Disconnected) => Err(DfuError::DeviceDisconnected {
                operation: state.to_string(),
            }),

            (state, DfuEvent::Notification(data)) => {
                let ack = Acknowledgement::parse(&data)?;
                info!("Received response to {:?}", ack.request);

                if state.awaited_response() != Some(ack.request) {
                    return Err(DfuError::UnexpectedResponse {
                        opcode: ack.request as u8,
                        state: state.to_string(),
                    });
                }

                Ok(match ack.request {
                    DfuOpcode::StartDfu => (
                        Transferring,
                        vec![
                            DfuStep::Control(ControlCommand::InitParams(InitPhase::Begin)),
                            DfuStep::InitPacket,
                            DfuStep::Control(ControlCommand::InitParams(InitPhase::End)),
                        ],
                    ),
                    DfuOpcode::InitDfuParams => (
                        Validating,
                        vec![
                            DfuStep::Control(ControlCommand::ReceiveFirmware),
                            DfuStep::Firmware,
                        ],
                    ),
                    DfuOpcode::ReceiveFirmwareImage => {
                        (Activating, vec![DfuStep::Control(ControlCommand::Validate)])
                    }
                    _ => (Done, vec![DfuStep::Control(ControlCommand::Activate)]),
                })
            }

            (state, _) => Err(DfuError::InvalidState {
                state: state.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(request: DfuOpcode) -> DfuEvent {
        DfuEvent::Notification(Acknowledgement { request }.to_bytes())
    }

    fn ready(role: TargetRole) -> DfuStateMachine {
        let mut machine = DfuStateMachine::new();
        machine.handle(DfuEvent::LinkReady(role)).unwrap();
        machine
    }

    /// Drive a bootloader-role machine up to (not including) `stop`.
    fn advance_to(stop: DfuState) -> DfuStateMachine {
        let mut machine = ready(TargetRole::Bootloader);
        machine.handle(DfuEvent::Begin).unwrap();
        for request in [
            DfuOpcode::StartDfu,
            DfuOpcode::InitDfuParams,
            DfuOpcode::ReceiveFirmwareImage,
            DfuOpcode::ValidateFirmware,
        ] {
            if machine.state() == stop {
                break;
            }
            machine.handle(ack(request)).unwrap();
        }
        assert_eq!(machine.state(), stop);
        machine
    }

    #[test]
    fn test_full_bootloader_sequence() {
        let mut machine = ready(TargetRole::Bootloader);
        assert_eq!(machine.state(), DfuState::Connected);

        let steps = machine.handle(DfuEvent::Begin).unwrap();
        assert_eq!(
            steps,
            vec![
                DfuStep::Control(ControlCommand::StartDfu(DfuImageType::Application)),
                DfuStep::SizeHeader,
            ]
        );
        assert_eq!(machine.state(), DfuState::ParamsInit);

        let steps = machine.handle(ack(DfuOpcode::StartDfu)).unwrap();
        assert_eq!(
            steps,
            vec![
                DfuStep::Control(ControlCommand::InitParams(InitPhase::Begin)),
                DfuStep::InitPacket,
                DfuStep::Control(ControlCommand::InitParams(InitPhase::End)),
            ]
        );
        assert_eq!(machine.state(), DfuState::Transferring);

        let steps = machine.handle(ack(DfuOpcode::InitDfuParams)).unwrap();
        assert_eq!(
            steps,
            vec![
                DfuStep::Control(ControlCommand::ReceiveFirmware),
                DfuStep::Firmware,
            ]
        );
        assert_eq!(machine.state(), DfuState::Validating);

        let steps = machine.handle(ack(DfuOpcode::ReceiveFirmwareImage)).unwrap();
        assert_eq!(steps, vec![DfuStep::Control(ControlCommand::Validate)]);
        assert_eq!(machine.state(), DfuState::Activating);

        let steps = machine.handle(ack(DfuOpcode::ValidateFirmware)).unwrap();
        assert_eq!(steps, vec![DfuStep::Control(ControlCommand::Activate)]);
        assert_eq!(machine.state(), DfuState::Done);

        assert!(machine.handle(DfuEvent::Disconnected).unwrap().is_empty());
        assert_eq!(machine.state(), DfuState::Done);
    }

    #[test]
    fn test_application_role_only_starts_dfu() {
        let mut machine = ready(TargetRole::Application);

        let steps = machine.handle(DfuEvent::Begin).unwrap();
        assert_eq!(
            steps,
            vec![DfuStep::Control(ControlCommand::StartDfu(
                DfuImageType::Application
            ))]
        );
        assert_eq!(machine.state(), DfuState::AwaitingReset);

        let steps = machine.handle(DfuEvent::Disconnected).unwrap();
        assert!(steps.is_empty());
        assert_eq!(machine.state(), DfuState::Idle);
        assert_eq!(machine.role(), None);

        // A fresh connection starts over from Idle
        machine
            .handle(DfuEvent::LinkReady(TargetRole::Bootloader))
            .unwrap();
        assert_eq!(machine.state(), DfuState::Connected);
    }

    #[test]
    fn test_receive_firmware_requires_init_params_ack() {
        let mut machine = advance_to(DfuState::ParamsInit);
        let err = machine.handle(ack(DfuOpcode::InitDfuParams)).unwrap_err();

        assert!(matches!(err, DfuError::UnexpectedResponse { opcode: 0x02, .. }));
        assert_eq!(machine.state(), DfuState::Failed);
    }

    #[test]
    fn test_repeated_ack_is_violation() {
        let mut machine = advance_to(DfuState::Transferring);
        assert!(machine.handle(ack(DfuOpcode::StartDfu)).is_err());
        assert_eq!(machine.state(), DfuState::Failed);
    }

    #[test]
    fn test_error_status_fails_without_steps() {
        let mut machine = advance_to(DfuState::Activating);
        let err = machine
            .handle(DfuEvent::Notification(vec![0x10, 0x04, 0x05]))
            .unwrap_err();

        assert!(matches!(err, DfuError::DfuResponse { code: 5, .. }));
        assert_eq!(machine.state(), DfuState::Failed);
    }

    #[test]
    fn test_bad_length_fails() {
        let mut machine = advance_to(DfuState::ParamsInit);
        assert!(matches!(
            machine.handle(DfuEvent::Notification(vec![0x10, 0x01])),
            Err(DfuError::BadResponseLength { length: 2 })
        ));
    }

    #[test]
    fn test_failed_machine_rejects_everything() {
        let mut machine = advance_to(DfuState::ParamsInit);
        let _ = machine.handle(DfuEvent::Notification(vec![0x11, 0x01, 0x01]));
        assert_eq!(machine.state(), DfuState::Failed);

        assert!(matches!(
            machine.handle(ack(DfuOpcode::StartDfu)),
            Err(DfuError::InvalidState { .. })
        ));
        assert!(matches!(
            machine.handle(DfuEvent::Disconnected),
            Err(DfuError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_disconnect_mid_transfer_is_fatal() {
        let mut machine = advance_to(DfuState::Validating);
        assert!(matches!(
            machine.handle(DfuEvent::Disconnected),
            Err(DfuError::DeviceDisconnected { .. })
        ));
        assert_eq!(machine.state(), DfuState::Failed);
    }

    #[test]
    fn test_begin_before_ready_is_invalid() {
        let mut machine = DfuStateMachine::new();
        assert!(matches!(
            machine.handle(DfuEvent::Begin),
            Err(DfuError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_notification_while_awaiting_reset_is_violation() {
        let mut machine = ready(TargetRole::Application);
        machine.handle(DfuEvent::Begin).unwrap();
        assert!(matches!(
            machine.handle(ack(DfuOpcode::StartDfu)),
            Err(DfuError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_step_failure_ends_machine() {
        let mut machine = DfuStateMachine::new();
        machine.handle(DfuEvent::LinkReady(TargetRole::Bootloader)).unwrap();
        machine.handle(DfuEvent::Begin).unwrap();

        machine.fail(&DfuError::DeviceDisconnected {
            operation: "write".into(),
        });

        assert_eq!(machine.state(), DfuState::Failed);
        assert!(matches!(
            machine.handle(DfuEvent::Notification(vec![0x10, 0x01, 0x01])),
            Err(DfuError::InvalidState { .. })
        ));
    }
}
