//! Supervisor for the locally managed PlantUML picoweb server.
//!
//! Runs `java -jar plantuml.jar -picoweb:PORT` as a child process with both
//! output streams discarded; picoweb blocks when its output buffer fills.
//! The listen port is discovered by probing upward from the configured one,
//! so a stale instance or an unrelated service never wedges startup.

use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::ServerSettings;

const TARGET: &str = "infra::embedded";

const PORT_SCAN_SPAN: u16 = 100;
const READINESS_POLL: Duration = Duration::from_millis(500);
const READINESS_ATTEMPTS: u32 = 30;
const STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum EmbeddedServerError {
    #[error("PlantUML jar not found at {path}")]
    JarMissing { path: PathBuf },
    #[error("no free port in {first}..{last}")]
    NoFreePort { first: u16, last: u16 },
    #[error("failed to start PlantUML server: {source}; make sure Java is installed")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

/// Externally visible state of the supervised process.
#[derive(Debug, Clone)]
pub struct EmbeddedStatus {
    pub running: bool,
    pub port: u16,
    pub url: String,
}

pub struct EmbeddedServer {
    java: PathBuf,
    jar: PathBuf,
    preferred_port: u16,
    child: Option<Child>,
    port: u16,
}

impl EmbeddedServer {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            java: settings.embedded_java.clone(),
            jar: settings.embedded_jar.clone(),
            preferred_port: settings.embedded_port,
            child: None,
            port: settings.embedded_port,
        }
    }

    /// Base URL render requests should target while the server runs.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Spawn the server and wait for it to accept connections.
    ///
    /// Idempotent: a second start while the child is alive reports the
    /// existing instance. Readiness is best-effort; a slow JVM start is
    /// logged, not fatal, since the monitor keeps probing afterwards.
    pub async fn start(&mut self) -> Result<EmbeddedStatus, EmbeddedServerError> {
        if self.child.as_mut().is_some_and(|child| child.try_wait().ok().flatten().is_none()) {
            return Ok(self.status());
        }
        self.child = None;

        if !self.jar.exists() {
            return Err(EmbeddedServerError::JarMissing {
                path: self.jar.clone(),
            });
        }

        let port = find_available_port(self.preferred_port)?;
        let child = Command::new(&self.java)
            .arg("-jar")
            .arg(&self.jar)
            .arg(format!("-picoweb:{port}"))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EmbeddedServerError::Spawn { source })?;

        self.child = Some(child);
        self.port = port;

        info!(
            target = TARGET,
            op = "embedded::start",
            port,
            jar = %self.jar.display(),
            "PlantUML server starting"
        );

        let mut ready = false;
        for attempt in 1..=READINESS_ATTEMPTS {
            tokio::time::sleep(READINESS_POLL).await;
            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                info!(
                    target = TARGET,
                    op = "embedded::start",
                    result = "ready",
                    port,
                    elapsed_ms = u64::from(attempt) * READINESS_POLL.as_millis() as u64,
                    "PlantUML server accepting connections"
                );
                ready = true;
                break;
            }
        }
        if !ready {
            warn!(
                target = TARGET,
                op = "embedded::start",
                result = "not_ready",
                port,
                "PlantUML server not accepting connections yet"
            );
        }

        Ok(self.status())
    }

    /// Kill the child and reap it.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!(target = TARGET, op = "embedded::stop", port = self.port, "Stopping PlantUML server");
        if let Err(err) = child.kill().await {
            warn!(
                target = TARGET,
                op = "embedded::stop",
                result = "kill_error",
                error = %err,
                "Failed to kill PlantUML server"
            );
        }
        let _ = child.wait().await;
    }

    pub async fn restart(&mut self) -> Result<EmbeddedStatus, EmbeddedServerError> {
        self.stop().await;
        tokio::time::sleep(STOP_GRACE).await;
        self.start().await
    }

    pub fn status(&mut self) -> EmbeddedStatus {
        let running = self
            .child
            .as_mut()
            .is_some_and(|child| child.try_wait().ok().flatten().is_none());
        EmbeddedStatus {
            running,
            port: self.port,
            url: self.base_url(),
        }
    }
}

/// First bindable port in `[start, start + PORT_SCAN_SPAN)`.
fn find_available_port(start: u16) -> Result<u16, EmbeddedServerError> {
    let last = start.saturating_add(PORT_SCAN_SPAN);
    for port in start..last {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(EmbeddedServerError::NoFreePort { first: start, last })
}
