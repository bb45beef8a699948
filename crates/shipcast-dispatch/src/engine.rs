use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use shipcast_core::Platform;

use crate::error::DispatchError;
use crate::session::BrowserSession;
use crate::timing::JitterWindow;

// ── State machine ──

/// Dispatch attempt states, in order of normal progression.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    Idle,
    SessionAcquiring,
    Navigating,
    Composing,
    ConfirmWait,
    Submitting,
    Succeeded,
    Failed,
}

// ── Confirm gate ──

/// The three-and-only-three outcomes of human review. Anything else the
/// user types is re-prompted at the input boundary; the engine never sees
/// it and never defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    Post,
    SaveDraft,
    Abort,
}

/// Sending half, held by whatever collects the human decision.
#[derive(Clone)]
pub struct ConfirmHandle {
    tx: mpsc::Sender<ConfirmDecision>,
}

impl ConfirmHandle {
    pub async fn decide(&self, decision: ConfirmDecision) -> bool {
        self.tx.send(decision).await.is_ok()
    }

    /// For plain threads collecting the decision (e.g. a stdin prompt).
    pub fn decide_blocking(&self, decision: ConfirmDecision) -> bool {
        self.tx.blocking_send(decision).is_ok()
    }
}

/// Receiving half, awaited by the engine during ConfirmWait. The wait is
/// unbounded; human review has no timeout.
pub struct ConfirmGate {
    rx: mpsc::Receiver<ConfirmDecision>,
}

impl ConfirmGate {
    pub async fn wait(&mut self) -> Result<ConfirmDecision, DispatchError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| DispatchError::Aborted("decision channel closed".into()))
    }
}

pub fn confirm_channel() -> (ConfirmHandle, ConfirmGate) {
    let (tx, rx) = mpsc::channel(4);
    (ConfirmHandle { tx }, ConfirmGate { rx })
}

// ── Requests and outcomes ──

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub platform: Platform,
    pub text: String,
    /// Rendered artifact to attach, if any.
    pub image: Option<PathBuf>,
    /// Reply target: platform post reference of the parent post.
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Platform-side post reference read back from the DOM.
    pub post_ref: String,
    /// Observed inter-step waits, for jitter verification.
    pub waits: Vec<Duration>,
    pub submit_attempts: u32,
    /// States visited, in order.
    pub trace: Vec<DispatchPhase>,
}

/// How a dispatch concluded when no error occurred.
#[derive(Debug)]
pub enum DispatchVerdict {
    Posted(DispatchOutcome),
    /// Human chose to keep the draft without posting.
    DraftSaved,
    /// Human abandoned the post entirely.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub jitter: JitterWindow,
    pub max_submit_attempts: u32,
    pub backoff_base_ms: u64,
    /// Timeout for network-bound steps (navigation, submission). Does not
    /// apply to ConfirmWait.
    pub step_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            jitter: JitterWindow::default(),
            max_submit_attempts: 3,
            backoff_base_ms: 2_000,
            step_timeout: Duration::from_secs(30),
        }
    }
}

// ── Engine ──

/// Owns the single browser session resource. A second concurrent dispatch
/// waits on the session mutex rather than opening a competing session.
pub struct DispatchEngine {
    session: tokio::sync::Mutex<Box<dyn BrowserSession>>,
    rng: std::sync::Mutex<StdRng>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(session: Box<dyn BrowserSession>, config: DispatchConfig) -> Self {
        Self {
            session: tokio::sync::Mutex::new(session),
            rng: std::sync::Mutex::new(StdRng::from_entropy()),
            config,
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_rng_seed(session: Box<dyn BrowserSession>, config: DispatchConfig, seed: u64) -> Self {
        Self {
            session: tokio::sync::Mutex::new(session),
            rng: std::sync::Mutex::new(StdRng::seed_from_u64(seed)),
            config,
        }
    }

    /// Run one dispatch attempt through the state machine. `confirm` is
    /// present exactly when the orchestrator's confirm flag is set.
    pub async fn dispatch(
        &self,
        req: &DispatchRequest,
        mut confirm: Option<&mut ConfirmGate>,
    ) -> Result<DispatchVerdict, DispatchError> {
        let mut session = self.session.lock().await;
        let mut trace = vec![DispatchPhase::Idle];
        let mut waits = Vec::new();

        trace.push(DispatchPhase::SessionAcquiring);
        session.acquire(req.platform).await?;

        trace.push(DispatchPhase::Navigating);
        let url = match &req.in_reply_to {
            Some(parent) => reply_url(req.platform, parent),
            None => compose_url(req.platform).to_string(),
        };
        self.step(session.navigate(&url), "navigate").await?;
        self.pause(&mut waits).await;

        trace.push(DispatchPhase::Composing);
        self.step(
            session.type_text(compose_selector(req.platform), &req.text),
            "compose",
        )
        .await?;
        if let Some(image) = &req.image {
            self.step(
                session.type_text(attach_selector(req.platform), &image.to_string_lossy()),
                "attach",
            )
            .await?;
        }
        self.pause(&mut waits).await;

        if let Some(gate) = confirm.as_deref_mut() {
            trace.push(DispatchPhase::ConfirmWait);
            match gate.wait().await? {
                ConfirmDecision::Post => {}
                ConfirmDecision::SaveDraft => {
                    tracing::info!(platform = %req.platform, "draft kept, not posting");
                    return Ok(DispatchVerdict::DraftSaved);
                }
                ConfirmDecision::Abort => {
                    tracing::info!(platform = %req.platform, "dispatch aborted by reviewer");
                    return Ok(DispatchVerdict::Aborted);
                }
            }
        }

        trace.push(DispatchPhase::Submitting);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.pause(&mut waits).await;
            match self
                .step(session.click(submit_selector(req.platform)), "submit")
                .await
            {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < self.config.max_submit_attempts => {
                    let delay = compute_backoff(self.config.backoff_base_ms, attempt);
                    tracing::warn!(
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "submit failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    trace.push(DispatchPhase::Failed);
                    return Err(e);
                }
            }
        }

        let post_ref = self
            .step(
                session.read_dom(permalink_selector(req.platform)),
                "read post ref",
            )
            .await?;
        trace.push(DispatchPhase::Succeeded);

        Ok(DispatchVerdict::Posted(DispatchOutcome {
            post_ref,
            waits,
            submit_attempts: attempt,
            trace,
        }))
    }

    /// Wrap a network-bound sub-step with the configured timeout.
    async fn step<T>(
        &self,
        fut: impl Future<Output = Result<T, DispatchError>>,
        label: &'static str,
    ) -> Result<T, DispatchError> {
        match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(label)),
        }
    }

    /// Randomized anti-detection wait between interaction steps.
    async fn pause(&self, waits: &mut Vec<Duration>) {
        let delay = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            self.config.jitter.sample(&mut *rng)
        };
        waits.push(delay);
        tokio::time::sleep(delay).await;
    }
}

fn compute_backoff(base_ms: u64, attempt: u32) -> Duration {
    let ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    // Cap at one minute
    Duration::from_millis(ms.min(60_000))
}

// ── Platform selectors ──

fn compose_url(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitter => "https://twitter.com/compose/post",
        Platform::Linkedin => "https://www.linkedin.com/feed/",
    }
}

fn reply_url(platform: Platform, parent_ref: &str) -> String {
    match platform {
        Platform::Twitter => format!("https://twitter.com/i/status/{parent_ref}"),
        Platform::Linkedin => format!("https://www.linkedin.com/feed/update/{parent_ref}"),
    }
}

fn compose_selector(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitter => r#"div[contenteditable="true"][data-testid="tweetTextarea_0"]"#,
        Platform::Linkedin => r#"div[contenteditable="true"][role="textbox"]"#,
    }
}

fn attach_selector(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitter | Platform::Linkedin => r#"input[type="file"]"#,
    }
}

fn submit_selector(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitter => r#"div[data-testid="tweetButtonInline"]"#,
        Platform::Linkedin => r#"button[aria-label="Post"]"#,
    }
}

fn permalink_selector(platform: Platform) -> &'static str {
    match platform {
        Platform::Twitter => r#"a[href*="/status/"]"#,
        Platform::Linkedin => r#"a[href*="/feed/update/"]"#,
    }
}
