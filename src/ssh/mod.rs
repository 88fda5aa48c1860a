//! Remote shell on the device.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, SshSettings};
use crate::error::{HarnessError, HarnessResult};

/// Exit status `ssh` reports for its own failures (unreachable host, auth).
const SSH_TRANSPORT_FAILURE: i32 = 255;
const ASKPASS_VARIABLE: &str = "ROUTER_HARNESS_SSH_PASSWORD";

/// Command execution on the device. One session per channel run.
#[async_trait]
pub trait RemoteShell: Send {
    /// Runs `command` and returns its stdout. A non-zero exit is `CommandFailed`.
    async fn execute(&mut self, command: &str) -> HarnessResult<String>;

    async fn close(&mut self) -> HarnessResult<()>;
}

/// Shell over the system OpenSSH client with a shared control connection.
///
/// The password is handed to `ssh` through an askpass helper reading it
/// from the child environment; it is never written to disk or logged.
pub struct OpenSshShell {
    binary: String,
    destination: String,
    port: u16,
    password: String,
    connect_timeout: Duration,
    workdir: TempDir,
    askpass: PathBuf,
}

impl OpenSshShell {
    /// Opens the control connection and checks it with a no-op command.
    pub async fn connect(device: &DeviceConfig, settings: &SshSettings) -> HarnessResult<Self> {
        let ssh = &device.device.ssh;
        let workdir = tempfile::Builder::new()
            .prefix("router-harness-ssh")
            .tempdir()?;
        let askpass = write_askpass(workdir.path())?;

        let mut shell = Self {
            binary: settings.binary.clone(),
            destination: format!("{}@{}", ssh.username, device.device.ip),
            port: ssh.port,
            password: ssh.password.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            workdir,
            askpass,
        };

        info!("Connecting over SSH to {}:{}", shell.destination, shell.port);
        shell.execute("true").await?;
        info!("SSH connection established");
        Ok(shell)
    }

    fn control_path(&self) -> PathBuf {
        self.workdir.path().join("cm-%r@%h:%p")
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("SSH_ASKPASS", &self.askpass)
            .env("SSH_ASKPASS_REQUIRE", "force")
            .env("DISPLAY", ":0")
            .env(ASKPASS_VARIABLE, &self.password)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-o")
            .arg("PreferredAuthentications=password,keyboard-interactive")
            .arg("-o")
            .arg("NumberOfPasswordPrompts=1")
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .arg("-o")
            .arg("ControlPersist=60")
            .arg("-p")
            .arg(self.port.to_string())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, command: &str) -> HarnessResult<Output> {
        // Upper bound on a single command including the connect phase.
        let limit = self.connect_timeout + Duration::from_secs(120);
        match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(HarnessError::ConnectionFailure(format!(
                "Failed to start {}: {}",
                self.binary, e
            ))),
            Err(_) => Err(HarnessError::timeout(format!("ssh: {}", command), limit)),
        }
    }
}

fn write_askpass(dir: &Path) -> HarnessResult<PathBuf> {
    let path = dir.join("askpass.sh");
    fs::write(
        &path,
        format!("#!/bin/sh\nprintf '%s\\n' \"${}\"\n", ASKPASS_VARIABLE),
    )?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(path)
}

/// Classifies a finished `ssh` invocation.
pub fn interpret_output(command: &str, output: &Output) -> HarnessResult<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        return Ok(stdout);
    }

    if output.status.code() == Some(SSH_TRANSPORT_FAILURE) {
        if stderr.contains("Permission denied") {
            return Err(HarnessError::AuthenticationFailure(stderr.trim().to_string()));
        }
        return Err(HarnessError::ConnectionFailure(stderr.trim().to_string()));
    }

    let combined = if stderr.trim().is_empty() {
        stdout
    } else {
        format!("{}{}", stdout, stderr)
    };
    Err(HarnessError::CommandFailed {
        command: command.to_string(),
        output: combined.trim().to_string(),
    })
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn execute(&mut self, command: &str) -> HarnessResult<String> {
        debug!("ssh $ {}", command);
        let mut cmd = self.base_command();
        cmd.arg(&self.destination).arg(command);
        let output = self.run(cmd, command).await?;
        interpret_output(command, &output)
    }

    async fn close(&mut self) -> HarnessResult<()> {
        let mut cmd = self.base_command();
        cmd.arg("-O").arg("exit").arg(&self.destination);
        match self.run(cmd, "-O exit").await {
            Ok(_) => info!("SSH connection closed"),
            Err(e) => warn!("Failed to close SSH control connection: {}", e),
        }
        Ok(())
    }
}

/// Quotes a value for a single-quoted shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
