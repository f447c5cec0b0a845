//! Line-oriented terminal front end.
//!
//! Reads one command per line from stdin, turns it into an [`Intent`], and
//! redraws whenever the orchestrator publishes a new snapshot. It never
//! touches the session directly.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::debug;

use wizard_core::{
    Intent, PendingLogin, Progress, RenderState, ServicePhase, StepId, StepStatus,
};

use crate::driver::WizardHandle;

#[derive(Debug, Clone, Copy)]
pub struct TerminalOptions {
    pub show_qr: bool,
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Intent(Intent),
    /// Copy the verification URL to the clipboard.
    Copy,
    Help,
    Nothing,
    Unknown(String),
}

const HELP: &str = "\
Commands:
  start            start setup (welcome) / start login (login)
  next, back       move between steps
  retry            reset the current step and try again
  name <device>    set the device name
  register         register this device (Enter also works)
  install          install and start the service
  copy             copy the login URL to the clipboard
  console          show or hide the diagnostics console
  close            leave the wizard
  help             this list";

/// Interpret one input line in the context of the current step.
pub fn parse_command(line: &str, current: StepId) -> Command {
    let trimmed = line.trim_start();
    if trimmed.trim().is_empty() {
        // Enter in the device-name field submits it.
        return if current == StepId::Register {
            Command::Intent(Intent::SubmitRegistration)
        } else {
            Command::Nothing
        };
    }

    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (trimmed, ""),
    };

    let intent = match word.to_ascii_lowercase().as_str() {
        "start" if current == StepId::Welcome => Intent::StartSetup,
        "start" => Intent::StartLogin,
        "next" => Intent::Next,
        "back" => Intent::Back,
        "retry" => Intent::Retry,
        "name" => Intent::EditDeviceName(rest.to_string()),
        "register" | "submit" => Intent::SubmitRegistration,
        "install" => Intent::InstallService,
        "console" => Intent::ToggleConsole,
        "close" | "quit" | "exit" => Intent::Close,
        "copy" => return Command::Copy,
        "help" | "?" => return Command::Help,
        other => return Command::Unknown(other.to_string()),
    };
    Command::Intent(intent)
}

/// Drive the terminal until the wizard is closed.
pub async fn run(handle: WizardHandle, options: TerminalOptions) -> Result<()> {
    let mut render_rx = handle.subscribe();
    let mut lines = spawn_stdin_reader();

    let initial = render_rx.borrow_and_update().clone();
    draw(&initial, options)?;

    loop {
        tokio::select! {
            changed = render_rx.changed() => {
                if changed.is_err() {
                    debug!("orchestrator stopped");
                    break;
                }
                let state = render_rx.borrow_and_update().clone();
                draw(&state, options)?;
                if state.closed {
                    break;
                }
            }

            line = lines.recv() => {
                // EOF closes the wizard, same as the close command.
                let Some(line) = line else {
                    handle.intent(Intent::Close).await;
                    break;
                };
                let current = handle.snapshot().current_step;
                match parse_command(&line, current) {
                    Command::Intent(intent) => {
                        if !handle.intent(intent).await {
                            break;
                        }
                    }
                    Command::Copy => copy_login_url(handle.snapshot().pending_login.as_ref()),
                    Command::Help => println!("{HELP}"),
                    Command::Nothing => {}
                    Command::Unknown(word) => println!("Unknown command '{word}'. Type 'help'."),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                handle.intent(Intent::Close).await;
                break;
            }
        }
    }

    Ok(())
}

/// Blocking line reader on its own thread, so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn draw(state: &RenderState, options: TerminalOptions) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(render(state, options).as_bytes())
        .context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

/// Render a full frame for `state`.
pub fn render(state: &RenderState, options: TerminalOptions) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&progress_bar(state));
    if !state.connected {
        out.push_str("  [disconnected, reconnecting]");
    }
    out.push_str("\n\n");

    let current = state.current();
    out.push_str(&format!("  {}\n", current.id.title()));
    out.push_str(&format!("  {}\n", "-".repeat(current.id.title().len())));

    for line in step_body(state, options) {
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
    }

    if state.console_visible {
        out.push_str("\n  Console (type 'console' to hide):\n");
        let earlier = state.console_total.saturating_sub(state.console_tail.len());
        if earlier > 0 {
            out.push_str(&format!("  | ... {earlier} earlier lines\n"));
        }
        for line in &state.console_tail {
            out.push_str("  | ");
            out.push_str(line);
            out.push('\n');
        }
    }

    if let Some(notice) = &state.notice {
        out.push_str(&format!("\n  Not available: {notice}\n"));
    }
    out.push_str(&format!("\n  {}\n", controls(state)));
    out
}

fn progress_bar(state: &RenderState) -> String {
    let marks: Vec<String> = state
        .steps
        .iter()
        .map(|view| {
            let mark = match view.progress {
                Progress::Done => "[x]",
                Progress::Active => "[>]",
                Progress::Upcoming => "[ ]",
            };
            format!("{mark} {}", view.id.title())
        })
        .collect();
    format!("  {}", marks.join("  "))
}

fn step_body(state: &RenderState, options: TerminalOptions) -> Vec<String> {
    let status = &state.current().status;
    let mut lines = Vec::new();

    match state.current_step {
        StepId::Welcome => {
            lines.push("This wizard signs you in, registers this device".into());
            lines.push("and installs the background service.".into());
        }
        StepId::Login => match status {
            StepStatus::NotStarted | StepStatus::AwaitingTrigger => {
                lines.push("Type 'start' to sign in.".into());
            }
            StepStatus::InProgress => lines.push("Starting login...".into()),
            StepStatus::AwaitingExternalConfirmation => {
                if let Some(pending) = &state.pending_login {
                    lines.extend(pending_login_lines(pending, options));
                }
            }
            StepStatus::Succeeded => lines.push("Signed in.".into()),
            StepStatus::Failed(reason) => lines.push(format!("Error: {reason}")),
        },
        StepId::Register => {
            let draft = if state.device_name.is_empty() {
                "(none)"
            } else {
                state.device_name.as_str()
            };
            lines.push(format!("Device name: {draft}"));
            if let Some(error) = &state.validation_error {
                lines.push(format!("! {error}"));
            }
            match status {
                StepStatus::NotStarted => lines.push("Set a name with 'name <device>'.".into()),
                StepStatus::AwaitingTrigger => {
                    lines.push("Press Enter or type 'register' to continue.".into())
                }
                StepStatus::InProgress => lines.push("Registering...".into()),
                StepStatus::Succeeded => lines.push("Device registered.".into()),
                StepStatus::Failed(reason) => lines.push(format!("Error: {reason}")),
                StepStatus::AwaitingExternalConfirmation => {}
            }
        }
        StepId::Service => match (status, state.service_phase) {
            (StepStatus::InProgress, ServicePhase::Installing) => {
                lines.push("Installing service...".into())
            }
            (StepStatus::InProgress, _) => lines.push("Starting service...".into()),
            (StepStatus::Succeeded, _) => lines.push("Service installed and running.".into()),
            (StepStatus::Failed(reason), _) => lines.push(format!("Error: {reason}")),
            _ => lines.push("Type 'install' to install the service.".into()),
        },
        StepId::Complete => lines.push("Setup complete.".into()),
    }

    lines
}

fn pending_login_lines(pending: &PendingLogin, options: TerminalOptions) -> Vec<String> {
    let mut lines = vec![
        "Open this URL to approve the login:".to_string(),
        format!("  {}", pending.verification_url_complete),
    ];
    if let Some(code) = pending.user_code() {
        lines.push(format!("Code: {code}"));
    }
    if options.show_qr {
        if let Some(qr) = render_qr(pending.qr_payload()) {
            lines.extend(qr.lines().map(str::to_string));
        }
    }
    lines.push("Waiting for confirmation... ('copy' copies the URL)".into());
    lines
}

fn controls(state: &RenderState) -> String {
    let current = state.current();
    let mut controls = Vec::new();
    match current.id {
        StepId::Welcome => controls.push("start"),
        StepId::Complete => controls.push("close"),
        _ if current.next_enabled => controls.push("next"),
        _ => {}
    }
    match (&current.id, &current.status) {
        (StepId::Login, StepStatus::NotStarted) => controls.push("start"),
        (StepId::Login, StepStatus::AwaitingExternalConfirmation) => {
            controls.extend(["retry", "copy"])
        }
        (StepId::Register, StepStatus::NotStarted) => controls.push("name"),
        (StepId::Register, StepStatus::AwaitingTrigger) => controls.extend(["name", "register"]),
        (StepId::Service, StepStatus::NotStarted) => controls.push("install"),
        (_, StepStatus::Failed(_)) => controls.push("retry"),
        _ => {}
    }
    if current.id != StepId::Welcome {
        controls.push("back");
    }
    controls.push("help");
    format!("[{}]", controls.join(" | "))
}

/// Render a QR code using Unicode half-blocks.
pub fn render_qr(data: &str) -> Option<String> {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "QR code generation failed");
            return None;
        }
    };

    Some(
        code.render::<char>()
            .quiet_zone(true)
            .module_dimensions(2, 1)
            .build(),
    )
}

fn copy_login_url(pending: Option<&PendingLogin>) {
    let Some(pending) = pending else {
        println!("Nothing to copy yet.");
        return;
    };
    if try_copy_to_clipboard(&pending.verification_url_complete) {
        println!("(copied to clipboard)");
    } else {
        println!("Clipboard unavailable; copy the URL above by hand.");
    }
}

/// Best-effort clipboard copy. Returns true if successful.
fn try_copy_to_clipboard(text: &str) -> bool {
    use std::process::{Command, Stdio};

    #[cfg(target_os = "macos")]
    let candidates: &[(&str, &[&str])] = &[("pbcopy", &[])];
    #[cfg(target_os = "linux")]
    let candidates: &[(&str, &[&str])] =
        &[("wl-copy", &[]), ("xclip", &["-selection", "clipboard"])];
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    let candidates: &[(&str, &[&str])] = &[];

    for (cmd, args) in candidates {
        let Ok(mut child) = Command::new(cmd)
            .args(*args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        else {
            continue;
        };
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(text.as_bytes());
        }
        if child.wait().is_ok_and(|s| s.success()) {
            return true;
        }
    }
    false
}
