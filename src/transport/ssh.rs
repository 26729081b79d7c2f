use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;

use super::process::ProcessChannel;
use crate::config::Host;
use crate::error::DockerError;
use crate::parser::ssh::SshDestination;

pub const SSH_PROGRAM: &str = "ssh";
/// How long the control master outlives its last multiplexed client
pub const CONTROL_PERSIST: Duration = Duration::from_secs(60);

fn destination(host: &Host) -> SshDestination {
    SshDestination {
        user: host.user().map(String::from),
        host: host.address().to_string(),
        port: host.port(),
    }
}

fn split_command(command: &str) -> Result<Vec<String>, DockerError> {
    let words = shell_words::split(command)
        .map_err(|e| DockerError::InvalidHost(format!("Invalid SSH command {:?}: {}", command, e)))?;
    if words.is_empty() {
        return Err(DockerError::InvalidHost("SSH command is empty".to_string()));
    }
    Ok(words)
}

/// One `ssh` process per connection, speaking to `docker system dial-stdio`
#[derive(Debug)]
pub struct SshSubprocess {
    label: String,
    destination: SshDestination,
    command: Vec<String>,
}

impl SshSubprocess {
    pub fn new(host: &Host, remote_command: &str) -> Result<Self, DockerError> {
        Ok(Self {
            label: host.to_string(),
            destination: destination(host),
            command: split_command(remote_command)?,
        })
    }

    /// Full `ssh` argument list, e.g. `-p 22 -l user host -- docker system dial-stdio`
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = self.destination.ssh_args();
        args.push(String::from("--"));
        args.extend(self.command.iter().cloned());
        args
    }

    pub fn connect(&self) -> Result<ProcessChannel, DockerError> {
        ProcessChannel::spawn(&self.label, SSH_PROGRAM, &self.args())
            .map_err(|e| DockerError::connection(&self.label, e))
    }
}

/// Connections multiplexed over one OpenSSH control master
///
/// Every channel is an `ssh` client that attaches to the master through a private
/// control socket, so authentication happens once. Closing a channel only ends that
/// client; [`SshSession::shutdown`] ends the master.
#[derive(Debug)]
pub struct SshSession {
    inner: SshSubprocess,
    control_dir: TempDir,
}

impl SshSession {
    pub fn new(host: &Host, remote_command: &str) -> Result<Self, DockerError> {
        let control_dir = tempfile::Builder::new()
            .prefix("dockwire-ssh")
            .tempdir()
            .map_err(|e| DockerError::connection(host.to_string(), e))?;

        Ok(Self {
            inner: SshSubprocess::new(host, remote_command)?,
            control_dir,
        })
    }

    #[must_use]
    pub fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("ctl")
    }

    fn control_args(&self) -> Vec<String> {
        vec![
            String::from("-o"),
            String::from("ControlMaster=auto"),
            String::from("-o"),
            format!("ControlPath={}", self.control_path().display()),
            String::from("-o"),
            format!("ControlPersist={}", CONTROL_PERSIST.as_secs()),
        ]
    }

    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = self.control_args();
        args.extend(self.inner.args());
        args
    }

    pub fn connect(&self) -> Result<ProcessChannel, DockerError> {
        ProcessChannel::spawn(&self.inner.label, SSH_PROGRAM, &self.args())
            .map_err(|e| DockerError::connection(&self.inner.label, e))
    }

    /// Ask the control master to exit
    ///
    /// A no-op if no channel was ever opened, since the master is only started on demand.
    #[tracing::instrument(skip(self), fields(host = %self.inner.label))]
    pub async fn shutdown(&self) -> Result<(), DockerError> {
        let control_path = self.control_path();
        if !control_path.exists() {
            return Ok(());
        }

        let mut args = vec![
            String::from("-O"),
            String::from("exit"),
            String::from("-o"),
            format!("ControlPath={}", control_path.display()),
        ];
        args.extend(self.inner.destination.ssh_args());

        let output = Command::new(SSH_PROGRAM)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DockerError::connection(&self.inner.label, e))?;

        if output.status.success() {
            log::debug!("SSH control master for {} stopped", self.inner.label);
        } else {
            log::warn!(
                "Failed to stop SSH control master for {}: {}",
                self.inner.label,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}
