use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::session::BrowserSession;
use shipcast_core::Platform;

/// Fixed namespace UUID for driver sessions.
const DRIVER_NS: Uuid = Uuid::from_bytes([
    0x5c, 0xa5, 0x70, 0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01,
]);

/// Deterministic session id per (platform, profile). The driver reuses
/// the existing authenticated browser context when it sees the same id.
pub fn driver_session_id(platform: Platform, profile: &str) -> Uuid {
    Uuid::new_v5(&DRIVER_NS, format!("{platform}-{profile}").as_bytes())
}

// ── Wire format ──

/// One request line on the driver's stdin.
#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    op: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

impl<'a> DriverRequest<'a> {
    fn op(id: u64, op: &'a str) -> Self {
        Self {
            id,
            op,
            session: None,
            platform: None,
            url: None,
            selector: None,
            text: None,
        }
    }
}

/// One response line on the driver's stdout.
#[derive(Debug, Deserialize)]
struct DriverResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Map a driver error code onto the dispatch taxonomy.
fn map_driver_error(code: Option<&str>, message: &str, platform: Platform) -> DispatchError {
    match code {
        Some("session_unavailable") => DispatchError::SessionUnavailable(platform),
        Some("rate_limited") => DispatchError::RateLimited,
        Some("not_found") => DispatchError::ElementNotFound(message.to_string()),
        Some("network") => DispatchError::Network(message.to_string()),
        _ => DispatchError::DriverProtocol(message.to_string()),
    }
}

// ── ProcessSession ──

/// Drives an external browser-automation sidecar over stdin/stdout JSONL.
/// The sidecar owns the Chrome profile; this end never sees credentials.
pub struct ProcessSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    profile: String,
    platform: Platform,
    next_id: u64,
    command_timeout: Duration,
}

impl ProcessSession {
    /// Spawn the configured driver command (e.g. `shipcast-driver --headful`).
    pub fn spawn(
        argv: &[String],
        profile: &str,
        command_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let (bin, args) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("browser.driver_cmd is empty"))?;
        let mut child = Command::new(bin)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawning driver {bin:?}: {e}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture driver stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture driver stdout"))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            profile: profile.to_string(),
            platform: Platform::Twitter,
            next_id: 0,
            command_timeout,
        })
    }

    pub async fn shutdown(mut self) {
        let _ = self.child.kill().await;
    }

    async fn roundtrip(&mut self, req: DriverRequest<'_>) -> Result<Option<String>, DispatchError> {
        let id = req.id;
        let mut line = serde_json::to_string(&req)
            .map_err(|e| DispatchError::DriverProtocol(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DispatchError::DriverProtocol(format!("driver stdin: {e}")))?;

        let deadline = tokio::time::Instant::now() + self.command_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.stdout.next_line())
                .await
                .map_err(|_| DispatchError::Timeout("driver command"))?
                .map_err(|e| DispatchError::DriverProtocol(format!("driver stdout: {e}")))?;
            let Some(raw) = next else {
                return Err(DispatchError::DriverProtocol("driver closed stdout".into()));
            };
            let resp: DriverResponse = match serde_json::from_str(&raw) {
                Ok(r) => r,
                // Drivers may interleave log lines; skip anything non-JSON.
                Err(_) => continue,
            };
            if resp.id != id {
                continue;
            }
            if resp.ok {
                return Ok(resp.value);
            }
            let message = resp.error.unwrap_or_else(|| "unknown driver error".into());
            return Err(map_driver_error(resp.code.as_deref(), &message, self.platform));
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[async_trait::async_trait]
impl BrowserSession for ProcessSession {
    async fn acquire(&mut self, platform: Platform) -> Result<(), DispatchError> {
        self.platform = platform;
        let session = driver_session_id(platform, &self.profile).to_string();
        let mut req = DriverRequest::op(self.next_id(), "acquire");
        req.session = Some(session);
        req.platform = Some(platform.as_str());
        self.roundtrip(req).await.map(|_| ())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), DispatchError> {
        let mut req = DriverRequest::op(self.next_id(), "navigate");
        req.url = Some(url);
        self.roundtrip(req).await.map(|_| ())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DispatchError> {
        let mut req = DriverRequest::op(self.next_id(), "type");
        req.selector = Some(selector);
        req.text = Some(text);
        self.roundtrip(req).await.map(|_| ())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DispatchError> {
        let mut req = DriverRequest::op(self.next_id(), "click");
        req.selector = Some(selector);
        self.roundtrip(req).await.map(|_| ())
    }

    async fn read_dom(&mut self, selector: &str) -> Result<String, DispatchError> {
        let mut req = DriverRequest::op(self.next_id(), "read_dom");
        req.selector = Some(selector);
        let value = self.roundtrip(req).await?;
        value.ok_or_else(|| DispatchError::ElementNotFound(selector.to_string()))
    }
}
