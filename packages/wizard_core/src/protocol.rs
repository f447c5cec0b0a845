//! Push-channel and trigger protocol types.
//!
//! Inbound frames are JSON objects tagged by `type`. Result frames carry at
//! most one meaningful field; precedence is `success`, then a non-empty
//! `error`, then `data`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::step::StepId;

/// Messages pushed FROM the backend TO the wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Authoritative jump to a step.
    Step { step: StepId },
    LoginResult(LoginReport),
    RegisterResult(OperationReport),
    ServiceInstallResult(OperationReport),
    ServiceStartResult(OperationReport),
    /// Diagnostic output line.
    Console { data: String },
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::LoginResult(_) => "loginResult",
            Self::RegisterResult(_) => "registerResult",
            Self::ServiceInstallResult(_) => "serviceInstallResult",
            Self::ServiceStartResult(_) => "serviceStartResult",
            Self::Console { .. } => "console",
        }
    }
}

/// Messages sent FROM the wizard TO the backend over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// The user closed the wizard.
    Exit,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Result frame for register / install / start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationReport {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }

    pub fn outcome(&self) -> Outcome {
        if self.success {
            return Outcome::Succeeded;
        }
        match self.error.as_deref() {
            Some(reason) if !reason.is_empty() => Outcome::Failed(reason.to_string()),
            _ => Outcome::Ignored,
        }
    }
}

/// Result frame for login; may also carry the verification payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginReport {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PendingLogin>,
}

impl LoginReport {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn pending(data: PendingLogin) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn outcome(&self) -> LoginOutcome {
        if self.success {
            return LoginOutcome::Succeeded;
        }
        if let Some(reason) = self.error.as_deref().filter(|e| !e.is_empty()) {
            return LoginOutcome::Failed(reason.to_string());
        }
        match &self.data {
            Some(pending) => LoginOutcome::AwaitingConfirmation(pending.clone()),
            None => LoginOutcome::Ignored,
        }
    }
}

/// Verification payload shown while the backend waits for out-of-band approval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLogin {
    pub verification_url_complete: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
}

impl PendingLogin {
    pub fn new(verification_url_complete: impl Into<String>) -> Self {
        Self {
            verification_url_complete: verification_url_complete.into(),
            ..Default::default()
        }
    }

    /// Code to type on the verification page, if the backend sent one.
    pub fn user_code(&self) -> Option<&str> {
        self.user_code.as_deref().filter(|c| !c.is_empty())
    }

    /// Payload to encode in the scannable code.
    pub fn qr_payload(&self) -> &str {
        self.qr_code_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.verification_url_complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Succeeded,
    Failed(String),
    AwaitingConfirmation(PendingLogin),
    Ignored,
}

/// A backend action started by a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    StartLogin,
    RegisterDevice { device_name: String },
    InstallService,
    StartService,
}

/// Body of `POST /api/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub device_name: String,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::StartLogin => OperationKind::StartLogin,
            Self::RegisterDevice { .. } => OperationKind::RegisterDevice,
            Self::InstallService => OperationKind::InstallService,
            Self::StartService => OperationKind::StartService,
        }
    }

    /// JSON body for the trigger request, if any.
    pub fn body(&self) -> Option<RegisterRequest> {
        match self {
            Self::RegisterDevice { device_name } => Some(RegisterRequest {
                device_name: device_name.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}

/// Operation without its payload; identifies acks and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    StartLogin,
    RegisterDevice,
    InstallService,
    StartService,
}

impl OperationKind {
    /// Trigger endpoint, relative to the backend base URL.
    pub fn path(self) -> &'static str {
        match self {
            Self::StartLogin => "/api/login",
            Self::RegisterDevice => "/api/register",
            Self::InstallService => "/api/service/install",
            Self::StartService => "/api/service/start",
        }
    }

    pub fn step(self) -> StepId {
        match self {
            Self::StartLogin => StepId::Login,
            Self::RegisterDevice => StepId::Register,
            Self::InstallService | Self::StartService => StepId::Service,
        }
    }

    /// Message used when the trigger itself could not be delivered.
    pub fn trigger_failure_message(self) -> &'static str {
        match self {
            Self::StartLogin => "Failed to start login process",
            Self::RegisterDevice => "Failed to start registration process",
            Self::InstallService => "Failed to start service installation",
            Self::StartService => "Failed to start service",
        }
    }

    /// The error frame a trigger failure is turned into. It has exactly the
    /// shape the backend would push for a failed operation.
    pub fn synthesized_failure(self) -> ServerMessage {
        let reason = self.trigger_failure_message();
        match self {
            Self::StartLogin => ServerMessage::LoginResult(LoginReport::error(reason)),
            Self::RegisterDevice => ServerMessage::RegisterResult(OperationReport::error(reason)),
            Self::InstallService => {
                ServerMessage::ServiceInstallResult(OperationReport::error(reason))
            }
            Self::StartService => ServerMessage::ServiceStartResult(OperationReport::error(reason)),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartLogin => write!(f, "login"),
            Self::RegisterDevice => write!(f, "register"),
            Self::InstallService => write!(f, "service-install"),
            Self::StartService => write!(f, "service-start"),
        }
    }
}
