//! The wizard session: all state the orchestrator owns, plus the read-only
//! snapshot handed to the presentation layer.

use std::collections::{BTreeMap, BTreeSet};

use crate::console::ConsoleBuffer;
use crate::machine::ValidationError;
use crate::protocol::{OperationKind, PendingLogin};
use crate::step::{ServicePhase, StepId, StepStatus};

/// Console lines carried in a [`RenderState`]. The full log stays in the
/// session.
pub const CONSOLE_TAIL_LINES: usize = 200;

/// Single-owner session state. Mutated only through [`WizardSession::apply`].
#[derive(Debug, Clone)]
pub struct WizardSession {
    pub(crate) current: StepId,
    pub(crate) statuses: BTreeMap<StepId, StepStatus>,
    pub(crate) completed: BTreeSet<StepId>,
    pub(crate) pending_login: Option<PendingLogin>,
    pub(crate) device_name: String,
    pub(crate) validation_error: Option<ValidationError>,
    pub(crate) service_phase: ServicePhase,
    /// Trigger requests sent but not yet acknowledged, at most one per step.
    pub(crate) outstanding: BTreeMap<StepId, OperationKind>,
    pub(crate) console: ConsoleBuffer,
    pub(crate) connected: bool,
    pub(crate) closed: bool,
}

impl Default for WizardSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WizardSession {
    pub fn new() -> Self {
        let mut statuses: BTreeMap<StepId, StepStatus> = StepId::ALL
            .into_iter()
            .map(|step| (step, StepStatus::NotStarted))
            .collect();
        // Welcome has nothing to wait for.
        statuses.insert(StepId::Welcome, StepStatus::Succeeded);

        Self {
            current: StepId::Welcome,
            statuses,
            completed: BTreeSet::new(),
            pending_login: None,
            device_name: String::new(),
            validation_error: None,
            service_phase: ServicePhase::Idle,
            outstanding: BTreeMap::new(),
            console: ConsoleBuffer::new(),
            connected: false,
            closed: false,
        }
    }

    pub fn current_step(&self) -> StepId {
        self.current
    }

    pub fn status(&self, step: StepId) -> &StepStatus {
        // Every step is seeded in `new`; the map never loses keys.
        &self.statuses[&step]
    }

    pub fn is_completed(&self, step: StepId) -> bool {
        self.completed.contains(&step)
    }

    pub fn completed_steps(&self) -> &BTreeSet<StepId> {
        &self.completed
    }

    /// The step's forward control is enabled iff the step has succeeded.
    pub fn next_enabled(&self, step: StepId) -> bool {
        self.status(step).is_succeeded()
    }

    pub fn pending_login(&self) -> Option<&PendingLogin> {
        self.pending_login.as_ref()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn register_submit_enabled(&self) -> bool {
        *self.status(StepId::Register) == StepStatus::AwaitingTrigger
            && !self.has_outstanding_trigger(StepId::Register)
    }

    pub fn validation_error(&self) -> Option<&ValidationError> {
        self.validation_error.as_ref()
    }

    pub fn service_phase(&self) -> ServicePhase {
        self.service_phase
    }

    pub fn has_outstanding_trigger(&self, step: StepId) -> bool {
        self.outstanding.contains_key(&step)
    }

    pub fn console(&self) -> &ConsoleBuffer {
        &self.console
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True once the user has closed the wizard.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn snapshot(&self) -> RenderState {
        let steps = StepId::ALL
            .into_iter()
            .map(|id| StepView {
                id,
                status: self.status(id).clone(),
                completed: self.is_completed(id),
                next_enabled: self.next_enabled(id),
                progress: if id < self.current {
                    Progress::Done
                } else if id == self.current {
                    Progress::Active
                } else {
                    Progress::Upcoming
                },
            })
            .collect();

        RenderState {
            current_step: self.current,
            steps,
            pending_login: self.pending_login.clone(),
            device_name: self.device_name.clone(),
            register_submit_enabled: self.register_submit_enabled(),
            validation_error: self.validation_error.as_ref().map(ToString::to_string),
            service_phase: self.service_phase,
            console_total: self.console.len(),
            console_tail: self.console.tail(CONSOLE_TAIL_LINES).to_vec(),
            console_visible: self.console.is_visible(),
            connected: self.connected,
            closed: self.closed,
            notice: None,
        }
    }
}

/// Progress-bar marker for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    Active,
    Upcoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub id: StepId,
    pub status: StepStatus,
    pub completed: bool,
    pub next_enabled: bool,
    pub progress: Progress,
}

/// Everything the presentation layer may read. Owned copy; rendering never
/// touches the session itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderState {
    pub current_step: StepId,
    pub steps: Vec<StepView>,
    pub pending_login: Option<PendingLogin>,
    pub device_name: String,
    pub register_submit_enabled: bool,
    pub validation_error: Option<String>,
    pub service_phase: ServicePhase,
    /// Lines received so far, including those not in `console_tail`.
    pub console_total: usize,
    pub console_tail: Vec<String>,
    pub console_visible: bool,
    pub connected: bool,
    pub closed: bool,
    /// Why the last intent was refused, until the next intent. Set by the
    /// driver; the session never fills it in.
    pub notice: Option<String>,
}

impl RenderState {
    pub fn step(&self, id: StepId) -> &StepView {
        &self.steps[id.index()]
    }

    pub fn current(&self) -> &StepView {
        self.step(self.current_step)
    }
}

impl Default for RenderState {
    fn default() -> Self {
        WizardSession::new().snapshot()
    }
}
