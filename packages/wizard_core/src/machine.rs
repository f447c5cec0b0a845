//! Step state machine.
//!
//! [`WizardSession::apply`] consumes one event and runs to completion. It
//! never performs IO: anything that has to reach the outside world is
//! returned as an [`Effect`] for the driver to execute.

use std::fmt;

use crate::protocol::{
    ClientMessage, LoginOutcome, Operation, OperationKind, Outcome, ServerMessage,
};
use crate::session::WizardSession;
use crate::step::{ServicePhase, StepId, StepStatus};

/// User intents forwarded by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// "Start setup" on the welcome step.
    StartSetup,
    Next,
    Back,
    StartLogin,
    /// Reset the current step and try again.
    Retry,
    EditDeviceName(String),
    /// Submit control or Enter in the device-name field.
    SubmitRegistration,
    InstallService,
    ToggleConsole,
    Close,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartSetup => write!(f, "start setup"),
            Self::Next => write!(f, "next"),
            Self::Back => write!(f, "back"),
            Self::StartLogin => write!(f, "start login"),
            Self::Retry => write!(f, "retry"),
            Self::EditDeviceName(_) => write!(f, "edit device name"),
            Self::SubmitRegistration => write!(f, "register"),
            Self::InstallService => write!(f, "install service"),
            Self::ToggleConsole => write!(f, "toggle console"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Everything the state machine reacts to, in a single ordered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEvent {
    Intent(Intent),
    /// Frame received on the push channel.
    Push(ServerMessage),
    /// The backend acknowledged a trigger request.
    TriggerAccepted(OperationKind),
    /// The trigger request failed at the transport layer.
    TriggerFailed(OperationKind),
    ChannelOpened,
    ChannelClosed,
}

/// Work the driver must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Trigger(Operation),
    Send(ClientMessage),
    EndSession,
}

/// Local precondition failures. Shown inline, never sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a device name")]
    EmptyDeviceName,
}

/// Why an intent was not acted upon. The session is unchanged unless noted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("{intent} is not available on the {current} step")]
    WrongStep { intent: String, current: StepId },
    #[error("{0} has not finished yet")]
    NextLocked(StepId),
    #[error("already at the first step")]
    AtFirstStep,
    #[error("already at the last step")]
    AtLastStep,
    #[error("a request for {0} is still outstanding")]
    TriggerOutstanding(StepId),
    #[error("{intent} not valid while {step} is {status}")]
    InvalidStatus {
        intent: String,
        step: StepId,
        status: StepStatus,
    },
    /// The validation error is also recorded on the session.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl WizardSession {
    /// Apply one event. Intents that are not legal right now are rejected
    /// with an error and leave the session untouched (a failed device-name
    /// validation additionally records the inline error).
    pub fn apply(&mut self, event: WizardEvent) -> Result<Vec<Effect>, IntentError> {
        match event {
            WizardEvent::Intent(intent) => self.handle_intent(intent),
            WizardEvent::Push(message) => Ok(self.handle_push(message)),
            WizardEvent::TriggerAccepted(kind) => {
                self.settle(kind);
                Ok(Vec::new())
            }
            WizardEvent::TriggerFailed(kind) => {
                self.settle(kind);
                Ok(self.handle_push(kind.synthesized_failure()))
            }
            WizardEvent::ChannelOpened => {
                self.connected = true;
                Ok(Vec::new())
            }
            WizardEvent::ChannelClosed => {
                self.connected = false;
                Ok(Vec::new())
            }
        }
    }

    fn handle_intent(&mut self, intent: Intent) -> Result<Vec<Effect>, IntentError> {
        let label = intent.to_string();
        match intent {
            Intent::StartSetup => {
                self.require_step(&label, StepId::Welcome)?;
                self.go_to(StepId::Login);
                Ok(Vec::new())
            }
            Intent::Next => {
                let current = self.current;
                if !self.next_enabled(current) {
                    return Err(IntentError::NextLocked(current));
                }
                let next = current.next().ok_or(IntentError::AtLastStep)?;
                self.go_to(next);
                Ok(Vec::new())
            }
            Intent::Back => {
                let prev = self.current.prev().ok_or(IntentError::AtFirstStep)?;
                self.go_to(prev);
                Ok(Vec::new())
            }
            Intent::StartLogin => {
                self.require_step(&label, StepId::Login)?;
                self.require_idle(StepId::Login)?;
                self.require_status(&label, StepId::Login, &[StepStatus::NotStarted])?;
                Ok(self.start_login())
            }
            Intent::Retry => self.retry(),
            Intent::EditDeviceName(name) => {
                self.require_step(&label, StepId::Register)?;
                self.require_status(
                    &label,
                    StepId::Register,
                    &[StepStatus::NotStarted, StepStatus::AwaitingTrigger],
                )?;
                self.device_name = name;
                self.validation_error = None;
                self.sync_register_readiness();
                Ok(Vec::new())
            }
            Intent::SubmitRegistration => {
                self.require_step(&label, StepId::Register)?;
                self.require_idle(StepId::Register)?;
                self.require_status(
                    &label,
                    StepId::Register,
                    &[StepStatus::NotStarted, StepStatus::AwaitingTrigger],
                )?;
                self.submit_registration()
            }
            Intent::InstallService => {
                self.require_step(&label, StepId::Service)?;
                self.require_idle(StepId::Service)?;
                self.require_status(&label, StepId::Service, &[StepStatus::NotStarted])?;
                Ok(self.install_service())
            }
            Intent::ToggleConsole => {
                self.console.toggle();
                Ok(Vec::new())
            }
            Intent::Close => {
                self.closed = true;
                Ok(vec![Effect::Send(ClientMessage::Exit), Effect::EndSession])
            }
        }
    }

    fn retry(&mut self) -> Result<Vec<Effect>, IntentError> {
        let label = Intent::Retry.to_string();
        match self.current {
            StepId::Login => {
                self.require_idle(StepId::Login)?;
                self.require_status(
                    &label,
                    StepId::Login,
                    &[
                        StepStatus::AwaitingExternalConfirmation,
                        StepStatus::Failed(String::new()),
                    ],
                )?;
                self.reset_login();
                Ok(self.start_login())
            }
            StepId::Register => {
                self.require_idle(StepId::Register)?;
                self.require_status(&label, StepId::Register, &[StepStatus::Failed(String::new())])?;
                self.reset_register();
                if self.status(StepId::Register) == &StepStatus::AwaitingTrigger {
                    self.submit_registration()
                } else {
                    Ok(Vec::new())
                }
            }
            StepId::Service => {
                self.require_idle(StepId::Service)?;
                self.require_status(&label, StepId::Service, &[StepStatus::Failed(String::new())])?;
                self.reset_service();
                Ok(self.install_service())
            }
            current => Err(IntentError::WrongStep {
                intent: label,
                current,
            }),
        }
    }

    fn handle_push(&mut self, message: ServerMessage) -> Vec<Effect> {
        match message {
            ServerMessage::Step { step } => {
                self.go_to(step);
                Vec::new()
            }
            ServerMessage::LoginResult(report) => {
                match report.outcome() {
                    LoginOutcome::Succeeded => {
                        self.settle(OperationKind::StartLogin);
                        self.pending_login = None;
                        self.succeed(StepId::Login);
                    }
                    LoginOutcome::Failed(reason) => {
                        self.settle(OperationKind::StartLogin);
                        self.pending_login = None;
                        self.fail(StepId::Login, reason);
                    }
                    LoginOutcome::AwaitingConfirmation(pending) => {
                        self.settle(OperationKind::StartLogin);
                        self.pending_login = Some(pending);
                        self.set_status(StepId::Login, StepStatus::AwaitingExternalConfirmation);
                    }
                    LoginOutcome::Ignored => {}
                }
                Vec::new()
            }
            ServerMessage::RegisterResult(report) => {
                self.apply_outcome(OperationKind::RegisterDevice, report.outcome());
                Vec::new()
            }
            ServerMessage::ServiceInstallResult(report) => match report.outcome() {
                Outcome::Succeeded => {
                    self.settle(OperationKind::InstallService);
                    // Start is chained once per install phase; repeats of the
                    // same success must not trigger it again.
                    if self.service_phase == ServicePhase::Starting {
                        return Vec::new();
                    }
                    self.service_phase = ServicePhase::Starting;
                    self.set_status(StepId::Service, StepStatus::InProgress);
                    vec![self.trigger(Operation::StartService)]
                }
                outcome => {
                    self.apply_outcome(OperationKind::InstallService, outcome);
                    Vec::new()
                }
            },
            ServerMessage::ServiceStartResult(report) => {
                self.apply_outcome(OperationKind::StartService, report.outcome());
                Vec::new()
            }
            ServerMessage::Console { data } => {
                self.console.append(data);
                Vec::new()
            }
        }
    }

    fn apply_outcome(&mut self, kind: OperationKind, outcome: Outcome) {
        let step = kind.step();
        match outcome {
            Outcome::Succeeded => {
                self.settle(kind);
                self.succeed(step);
            }
            Outcome::Failed(reason) => {
                self.settle(kind);
                self.fail(step, reason);
            }
            Outcome::Ignored => {}
        }
    }

    fn start_login(&mut self) -> Vec<Effect> {
        self.set_status(StepId::Login, StepStatus::InProgress);
        vec![self.trigger(Operation::StartLogin)]
    }

    fn submit_registration(&mut self) -> Result<Vec<Effect>, IntentError> {
        let device_name = self.device_name.trim();
        if device_name.is_empty() {
            self.validation_error = Some(ValidationError::EmptyDeviceName);
            return Err(ValidationError::EmptyDeviceName.into());
        }
        let device_name = device_name.to_string();
        self.validation_error = None;
        self.set_status(StepId::Register, StepStatus::InProgress);
        Ok(vec![self.trigger(Operation::RegisterDevice { device_name })])
    }

    fn install_service(&mut self) -> Vec<Effect> {
        self.service_phase = ServicePhase::Installing;
        self.set_status(StepId::Service, StepStatus::InProgress);
        vec![self.trigger(Operation::InstallService)]
    }

    fn reset_login(&mut self) {
        self.pending_login = None;
        self.set_status(StepId::Login, StepStatus::NotStarted);
    }

    fn reset_register(&mut self) {
        self.validation_error = None;
        self.set_status(StepId::Register, StepStatus::NotStarted);
        self.sync_register_readiness();
    }

    fn reset_service(&mut self) {
        self.service_phase = ServicePhase::Idle;
        self.set_status(StepId::Service, StepStatus::NotStarted);
    }

    fn sync_register_readiness(&mut self) {
        let ready = !self.device_name.trim().is_empty();
        let status = if ready {
            StepStatus::AwaitingTrigger
        } else {
            StepStatus::NotStarted
        };
        self.set_status(StepId::Register, status);
    }

    /// Record an outstanding trigger and produce the effect that sends it.
    fn trigger(&mut self, operation: Operation) -> Effect {
        let kind = operation.kind();
        self.outstanding.insert(kind.step(), kind);
        Effect::Trigger(operation)
    }

    /// Clear the outstanding trigger for `kind`, if it is the one pending.
    fn settle(&mut self, kind: OperationKind) {
        let step = kind.step();
        if self.outstanding.get(&step) == Some(&kind) {
            self.outstanding.remove(&step);
        }
    }

    fn go_to(&mut self, step: StepId) {
        self.current = step;
        if step == StepId::Complete {
            self.succeed(StepId::Complete);
        }
    }

    fn succeed(&mut self, step: StepId) {
        self.set_status(step, StepStatus::Succeeded);
        self.completed.insert(step);
    }

    fn fail(&mut self, step: StepId, reason: String) {
        self.set_status(step, StepStatus::Failed(reason));
    }

    fn set_status(&mut self, step: StepId, status: StepStatus) {
        self.statuses.insert(step, status);
    }

    fn require_step(&self, intent: &str, step: StepId) -> Result<(), IntentError> {
        if self.current == step {
            Ok(())
        } else {
            Err(IntentError::WrongStep {
                intent: intent.to_string(),
                current: self.current,
            })
        }
    }

    fn require_idle(&self, step: StepId) -> Result<(), IntentError> {
        if self.has_outstanding_trigger(step) {
            Err(IntentError::TriggerOutstanding(step))
        } else {
            Ok(())
        }
    }

    /// `allowed` is matched by variant, so `Failed(_)` matches any reason.
    fn require_status(
        &self,
        intent: &str,
        step: StepId,
        allowed: &[StepStatus],
    ) -> Result<(), IntentError> {
        let status = self.status(step);
        let ok = allowed
            .iter()
            .any(|a| std::mem::discriminant(a) == std::mem::discriminant(status));
        if ok {
            Ok(())
        } else {
            Err(IntentError::InvalidStatus {
                intent: intent.to_string(),
                step,
                status: status.clone(),
            })
        }
    }
}
