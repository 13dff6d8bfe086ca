//! Execution of validated commands against the local system.
//!
//! The [`Dispatcher`] walks a [`CommandBatch`] in order and hands each command
//! to a [`Launcher`]. A failing command is logged and recorded in its
//! [`CommandReport`], and the batch carries on with the next one.

use std::io::ErrorKind;
use std::process::Stdio;

use log::{debug, error, info};
use tokio::process::Command as Process;

use crate::command::{Command, CommandBatch, CommandType};
use crate::config::DispatchConfig;
use crate::error::{Error, Result};

/// OS primitives used by the dispatcher.
///
/// All three are fire-and-forget: they return once the action is started,
/// without waiting for the spawned process to exit. [`SystemLauncher`]
/// spawns through tokio and must be called from within a runtime.
pub trait Launcher {
    fn open_terminal(&self, command: &str) -> Result<()>;
    fn open_application(&self, application_name: &str) -> Result<()>;
    fn open_url(&self, url: &str) -> Result<()>;
}

/// Outcome of one dispatched command.
#[derive(Debug)]
pub struct CommandReport {
    pub command: Command,
    pub error: Option<Error>,
}

impl CommandReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// One status line suitable for the console.
    pub fn status_line(&self) -> String {
        match &self.error {
            None => format!("[ok] {} {}", self.command.command_type(), self.command.target()),
            Some(err) => format!("[failed] {err}"),
        }
    }
}

pub struct Dispatcher<L> {
    launcher: L,
}

impl<L: Launcher> Dispatcher<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Runs every command of the batch, in order, one at a time.
    pub fn execute_all(&self, batch: CommandBatch) -> Vec<CommandReport> {
        batch
            .into_iter()
            .map(|command| {
                let error = self.execute(&command).err();
                if let Some(err) = &error {
                    error!(
                        "Command {} with {:?} failed: {err}",
                        command.command_type(),
                        command.parameters()
                    );
                }
                CommandReport { command, error }
            })
            .collect()
    }

    fn execute(&self, command: &Command) -> Result<()> {
        let target = command.target();
        match command.command_type() {
            CommandType::OpenTerminalAndExecute => {
                info!("Executing in terminal: {target}");
                self.launcher.open_terminal(target)
            }
            CommandType::OpenApplication => {
                info!("Opening application: {target}");
                self.launcher.open_application(target)
            }
            CommandType::OpenUrl => {
                info!("Opening URL: {target}");
                self.launcher.open_url(target)
            }
        }
    }
}

/// Launcher backed by the real desktop.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    terminal: Option<String>,
    app_launcher: Option<String>,
}

fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::Launch { source, .. } if source.kind() == ErrorKind::NotFound)
}

impl SystemLauncher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            terminal: config.terminal.clone(),
            app_launcher: config.app_launcher.clone(),
        }
    }

    /// Starts the process and reaps it in the background once it exits.
    fn spawn(action: &'static str, target: &str, mut process: Process) -> Result<()> {
        let mut child = process
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::Launch {
                action,
                target: target.to_string(),
                source,
            })?;
        let target = target.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("{action} {target} exited with {status}"),
                Err(e) => debug!("Could not wait for {action} {target}: {e}"),
            }
        });
        Ok(())
    }

    #[cfg(target_os = "windows")]
    fn terminal_process(&self, command: &str) -> Process {
        let mut process = Process::new("cmd");
        process.args(["/C", "start", "cmd", "/K", command]);
        process
    }

    #[cfg(target_os = "macos")]
    fn terminal_process(&self, command: &str) -> Process {
        let script = format!(
            "tell application \"Terminal\" to do script \"{}\"",
            command.replace('\\', "\\\\").replace('"', "\\\"")
        );
        let mut process = Process::new("osascript");
        process.args(["-e", &script, "-e", "tell application \"Terminal\" to activate"]);
        process
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn terminal_process(&self, command: &str) -> Process {
        let terminal = self.terminal.as_deref().unwrap_or("x-terminal-emulator");
        // Keep the window open once the command is done.
        let script = format!("{command}; exec \"${{SHELL:-sh}}\"");
        let mut process = Process::new(terminal);
        process.args(["-e", "sh", "-c", &script]);
        process
    }

    #[cfg(target_os = "windows")]
    fn application_process(application_name: &str) -> Process {
        let mut process = Process::new("cmd");
        process.args(["/C", "start", "", application_name]);
        process
    }

    #[cfg(target_os = "macos")]
    fn application_process(application_name: &str) -> Process {
        let mut process = Process::new("open");
        process.args(["-a", application_name]);
        process
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn application_process(application_name: &str) -> Process {
        Process::new(application_name)
    }

    /// Desktop-entry launcher for names that are not a binary on `PATH`.
    fn app_launcher_process(&self, application_name: &str) -> Process {
        let mut process = Process::new(self.app_launcher.as_deref().unwrap_or("gtk-launch"));
        process.arg(application_name);
        process
    }
}

impl Launcher for SystemLauncher {
    fn open_terminal(&self, command: &str) -> Result<()> {
        Self::spawn("open terminal for", command, self.terminal_process(command))
    }

    fn open_application(&self, application_name: &str) -> Result<()> {
        let spawned = Self::spawn(
            "open application",
            application_name,
            Self::application_process(application_name),
        );
        match spawned {
            Err(err)
                if cfg!(not(any(target_os = "windows", target_os = "macos")))
                    && is_not_found(&err) =>
            {
                info!("{application_name} is not on PATH, trying its desktop entry");
                Self::spawn(
                    "open application",
                    application_name,
                    self.app_launcher_process(application_name),
                )
            }
            other => other,
        }
    }

    fn open_url(&self, url: &str) -> Result<()> {
        webbrowser::open(url).map_err(|source| Error::Launch {
            action: "open URL",
            target: url.to_string(),
            source,
        })
    }
}
