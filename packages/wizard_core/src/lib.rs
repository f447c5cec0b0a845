//! Wizard Core - step model and state machine for the device setup wizard
//!
//! This crate holds everything about the setup flow that does not touch the
//! network: the ordered steps, per-step status, the push/trigger protocol
//! types, the diagnostics console and the state machine that ties them
//! together. It has no async runtime and performs no IO; the driver feeds it
//! [`WizardEvent`]s and executes the [`Effect`]s it returns.
//!
//! # Example
//!
//! ```
//! use wizard_core::{Effect, Intent, Operation, StepId, WizardEvent, WizardSession};
//!
//! let mut session = WizardSession::new();
//! session.apply(WizardEvent::Intent(Intent::StartSetup)).unwrap();
//! assert_eq!(session.current_step(), StepId::Login);
//!
//! let effects = session.apply(WizardEvent::Intent(Intent::StartLogin)).unwrap();
//! assert_eq!(effects, vec![Effect::Trigger(Operation::StartLogin)]);
//! ```

pub mod console;
pub mod machine;
pub mod protocol;
pub mod session;
pub mod step;

pub use console::ConsoleBuffer;
pub use machine::{Effect, Intent, IntentError, ValidationError, WizardEvent};
pub use protocol::{
    ClientMessage, LoginReport, Operation, OperationKind, OperationReport, PendingLogin,
    RegisterRequest, ServerMessage,
};
pub use session::{CONSOLE_TAIL_LINES, Progress, RenderState, StepView, WizardSession};
pub use step::{ServicePhase, StepId, StepStatus};
