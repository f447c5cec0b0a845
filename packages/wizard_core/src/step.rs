//! Wizard steps and their per-step status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One stage of the setup sequence. Declaration order is progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Welcome,
    Login,
    Register,
    Service,
    Complete,
}

impl StepId {
    pub const ALL: [StepId; 5] = [
        StepId::Welcome,
        StepId::Login,
        StepId::Register,
        StepId::Service,
        StepId::Complete,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The step after this one, `None` for `Complete`.
    pub fn next(self) -> Option<StepId> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// The step before this one, `None` for `Welcome`.
    pub fn prev(self) -> Option<StepId> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Welcome => "Welcome",
            Self::Login => "Log in",
            Self::Register => "Register device",
            Self::Service => "Install service",
            Self::Complete => "Done",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome => write!(f, "welcome"),
            Self::Login => write!(f, "login"),
            Self::Register => write!(f, "register"),
            Self::Service => write!(f, "service"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(Self::Welcome),
            "login" => Ok(Self::Login),
            "register" => Ok(Self::Register),
            "service" => Ok(Self::Service),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("unknown step: {s}")),
        }
    }
}

/// Current status of a single step. Not a history: one value per step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum StepStatus {
    NotStarted,
    AwaitingTrigger,
    InProgress,
    AwaitingExternalConfirmation,
    Succeeded,
    Failed(String),
}

impl StepStatus {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::AwaitingTrigger => write!(f, "ready"),
            Self::InProgress => write!(f, "in progress"),
            Self::AwaitingExternalConfirmation => write!(f, "waiting for confirmation"),
            Self::Succeeded => write!(f, "done"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Sub-phase of the two-part service step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServicePhase {
    #[default]
    Idle,
    Installing,
    Starting,
}
