//! OpenSSH transport.
//!
//! `connect` starts an OpenSSH control master for the configured host and
//! every command then runs as a multiplexed session over the master's
//! control socket, so only the first dial pays for key exchange and
//! authentication. Password authentication goes through `sshpass -e`.

use super::{Connection, Connector};
use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Exit status OpenSSH uses for its own (transport) failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// How often to probe the control socket while the master comes up.
const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Dials the configured host through the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: Arc<ExporterConfig>,
}

impl SshConnector {
    pub fn new(config: Arc<ExporterConfig>) -> Self {
        Self { config }
    }

    /// Arguments shared by the master and by each session.
    fn common_args(&self, cmd: &mut Command, control_path: &Path) {
        cmd.arg("-S").arg(control_path);
        cmd.arg("-p").arg(self.config.port.to_string());
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
        cmd.arg("-o").arg("LogLevel=ERROR");
    }

    fn master_command(&self, control_path: &Path) -> Command {
        let mut cmd = match &self.config.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh");
                cmd.env("SSHPASS", password.expose_secret());
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };

        cmd.arg("-M").arg("-N");
        self.common_args(&mut cmd, control_path);
        cmd.arg("-o").arg("ControlPersist=no");
        cmd.arg("-o").arg("Compression=yes");
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)));
        cmd.arg("-o")
            .arg(format!("ServerAliveInterval={}", self.config.keepalive.as_secs().max(1)));
        if let Some(key) = &self.config.identity_file {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(self.config.destination());

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn control_command(&self, control_path: &Path, operation: &str) -> Command {
        let mut cmd = Command::new("ssh");
        self.common_args(&mut cmd, control_path);
        cmd.arg("-O").arg(operation).arg(self.config.destination());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    async fn master_ready(&self, control_path: &Path) -> bool {
        matches!(
            self.control_command(control_path, "check").status().await,
            Ok(status) if status.success()
        )
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Connection = SshConnection;

    async fn connect(&self) -> Result<SshConnection> {
        let control_path = std::env::temp_dir().join(format!(
            "remote-node-exporter-{}.sock",
            Uuid::new_v4().simple()
        ));
        let address = self.config.address();
        debug!(%address, control_path = %control_path.display(), "Starting SSH control master");

        let mut master = self.master_command(&control_path).spawn().map_err(|e| {
            ExporterError::connect_error(format!("failed to spawn ssh for {}: {}", address, e))
        })?;

        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            let exited = master.try_wait().map_err(|e| {
                ExporterError::connect_error(format!("failed to poll ssh for {}: {}", address, e))
            })?;
            if let Some(status) = exited {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(ExporterError::connect_error(format!(
                    "ssh to {} exited with {}: {}",
                    address,
                    status,
                    stderr.trim()
                )));
            }

            if self.master_ready(&control_path).await {
                break;
            }

            if Instant::now() >= deadline {
                let _ = master.kill().await;
                remove_control_socket(&control_path).await;
                return Err(ExporterError::connect_error(format!(
                    "timed out after {:?} connecting to {}",
                    self.config.connect_timeout, address
                )));
            }

            tokio::time::sleep(MASTER_POLL_INTERVAL).await;
        }

        info!(%address, "SSH control master is up");
        Ok(SshConnection {
            connector: self.clone(),
            control_path,
            master: Mutex::new(Some(master)),
        })
    }
}

/// A running control master plus the socket sessions are opened through.
pub struct SshConnection {
    connector: SshConnector,
    control_path: PathBuf,
    master: Mutex<Option<Child>>,
}

impl SshConnection {
    /// A session opened while the master is gone would silently dial a
    /// fresh connection, so a dead master is reported as a transport failure.
    async fn ensure_master(&self) -> Result<()> {
        let mut master = self.master.lock().await;
        let Some(child) = master.as_mut() else {
            return Err(ExporterError::exec_error("ssh connection is closed"));
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(ExporterError::exec_error(format!(
                "ssh control master for {} exited with {}",
                self.connector.config.address(),
                status
            ))),
            Err(e) => Err(ExporterError::exec_error(format!(
                "failed to poll ssh control master: {}",
                e
            ))),
        }
    }
}

async fn remove_control_socket(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove control socket");
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn run(&self, command: &str) -> Result<String> {
        self.ensure_master().await?;

        let config = &self.connector.config;
        let mut cmd = Command::new("ssh");
        self.connector.common_args(&mut cmd, &self.control_path);
        cmd.arg("-o").arg("ControlMaster=no");
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg(config.destination()).arg(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| ExporterError::exec_error(format!("failed to spawn ssh: {}", e)))?;

        if output.status.code() == Some(SSH_TRANSPORT_FAILURE) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExporterError::exec_error(format!(
                "ssh session to {} failed: {}",
                config.address(),
                stderr.trim()
            )));
        }

        if !output.status.success() {
            debug!(command, status = %output.status, "Remote command exited non-zero");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn close(&self) {
        let _ = self
            .connector
            .control_command(&self.control_path, "exit")
            .status()
            .await;

        if let Some(mut master) = self.master.lock().await.take() {
            if let Err(e) = master.kill().await {
                debug!(error = %e, "SSH control master already gone");
            }
        }

        remove_control_socket(&self.control_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_master_command_with_key() {
        let config = ExporterConfig::new("192.168.2.1")
            .with_port(2222)
            .with_username(Some("admin".to_string()))
            .with_identity_file(Some(PathBuf::from("/root/.ssh/id_ed25519")));
        let connector = SshConnector::new(Arc::new(config));
        let cmd = connector.master_command(Path::new("/tmp/test.sock"));

        assert_eq!(cmd.as_std().get_program(), "ssh");
        let args = args(&cmd);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"-M".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"ConnectTimeout=8".to_string()));
        assert!(args.contains(&"/root/.ssh/id_ed25519".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("admin@192.168.2.1"));
    }

    #[test]
    fn test_master_command_with_password_uses_sshpass() {
        let config = ExporterConfig::new("router").with_password(Some("123456".to_string()));
        let connector = SshConnector::new(Arc::new(config));
        let cmd = connector.master_command(Path::new("/tmp/test.sock"));

        assert_eq!(cmd.as_std().get_program(), "sshpass");
        let args = args(&cmd);
        assert_eq!(&args[..2], &["-e".to_string(), "ssh".to_string()]);
        assert!(!args.iter().any(|a| a.contains("123456")));
    }

    fn connection(master: Option<Child>) -> SshConnection {
        SshConnection {
            connector: SshConnector::new(Arc::new(ExporterConfig::new("router"))),
            control_path: std::env::temp_dir().join("remote-node-exporter-test.sock"),
            master: Mutex::new(master),
        }
    }

    #[tokio::test]
    async fn test_exited_master_is_a_transport_failure() {
        let mut master = Command::new("true").spawn().unwrap();
        master.wait().await.unwrap();
        let connection = connection(Some(master));

        let err = connection.run("cat /proc/loadavg").await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("exited"));
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_commands() {
        let err = connection(None).run("cat /proc/loadavg").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_remove_control_socket() {
        let path = std::env::temp_dir().join(format!(
            "remote-node-exporter-{}.sock",
            Uuid::new_v4().simple()
        ));
        tokio::fs::write(&path, b"").await.unwrap();
        remove_control_socket(&path).await;
        assert!(!path.exists());

        // already gone
        remove_control_socket(&path).await;
    }

    #[test]
    fn test_control_command() {
        let connector = SshConnector::new(Arc::new(ExporterConfig::new("router")));
        let cmd = connector.control_command(Path::new("/tmp/test.sock"), "check");
        let args = args(&cmd);
        assert_eq!(&args[..2], &["-S".to_string(), "/tmp/test.sock".to_string()]);
        assert!(args.ends_with(&["-O".to_string(), "check".to_string(), "router".to_string()]));
    }
}
