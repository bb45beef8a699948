use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use shipcast_core::{EngagementSnapshot, Platform};
use shipcast_dispatch::{DispatchEngine, DispatchRequest, DispatchVerdict};
use shipcast_store::{LearningStore, PostStatus};

// ── Strategy ──

/// Follow-up flavor for an amplification reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AmplifyStrategy {
    Insight,
    Teaser,
    Question,
    Thread,
}

impl AmplifyStrategy {
    /// Pick a strategy from the original post's wording.
    pub fn for_content(content: &str) -> Self {
        let lower = content.to_lowercase();
        if ["feature", "launched", "released"].iter().any(|w| lower.contains(w)) {
            AmplifyStrategy::Teaser
        } else if ["how", "tutorial", "guide"].iter().any(|w| lower.contains(w)) {
            AmplifyStrategy::Insight
        } else if ["problem", "issue", "bug"].iter().any(|w| lower.contains(w)) {
            AmplifyStrategy::Question
        } else {
            AmplifyStrategy::Thread
        }
    }

    fn phrases(&self) -> &'static [&'static str] {
        match self {
            AmplifyStrategy::Insight => &[
                "Here's a deeper dive into the technical details…",
                "The key insight behind this change:",
                "Technical breakdown:",
            ],
            AmplifyStrategy::Question => &[
                "What do you think about this approach?",
                "Has anyone faced similar challenges?",
                "Would love to hear your thoughts on this!",
            ],
            AmplifyStrategy::Teaser => &[
                "Bonus: here's what I didn't mention in the original post…",
                "Pro tip: there's actually a more elegant way to do this…",
                "Quick follow-up: I also implemented…",
            ],
            AmplifyStrategy::Thread => &[
                "1/ Let's start a thread on why this matters",
                "Quick follow-up:",
                "Building on this:",
            ],
        }
    }

    pub fn reply_text(&self, rng: &mut impl Rng) -> String {
        let bank = self.phrases();
        let phrase = bank[rng.gen_range(0..bank.len())];
        format!("{phrase}\n\nMore details coming soon. #devlife")
    }
}

// ── Task ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Fired,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplificationTask {
    pub id: String,
    pub parent_post_id: String,
    /// Platform-side reference of the parent post (reply target).
    pub parent_ref: String,
    pub platform: Platform,
    /// Unix timestamp in nanoseconds.
    pub fire_at_nanos: i128,
    pub strategy: AmplifyStrategy,
    pub status: TaskStatus,
}

impl AmplificationTask {
    pub fn new(
        parent_post_id: &str,
        parent_ref: &str,
        platform: Platform,
        dispatch_time: OffsetDateTime,
        delay: Duration,
        strategy: AmplifyStrategy,
    ) -> Self {
        let fire_at = dispatch_time + delay;
        Self {
            id: ulid::Ulid::new().to_string(),
            parent_post_id: parent_post_id.to_string(),
            parent_ref: parent_ref.to_string(),
            platform,
            fire_at_nanos: fire_at.unix_timestamp_nanos(),
            strategy,
            status: TaskStatus::Scheduled,
        }
    }

    pub fn fire_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.fire_at_nanos)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

// ── Delay ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplifyConfig {
    #[serde(default = "d_min_delay")]
    pub min_delay_secs: u64,
    #[serde(default = "d_max_delay")]
    pub max_delay_secs: u64,
    /// How strongly early engagement pulls the follow-up forward. The
    /// exact response curve is a tunable, not a contract.
    #[serde(default = "d_velocity_gain")]
    pub velocity_gain: f64,
}

fn d_min_delay() -> u64 {
    2 * 3600
}
fn d_max_delay() -> u64 {
    4 * 3600
}
fn d_velocity_gain() -> f64 {
    0.5
}

impl Default for AmplifyConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: d_min_delay(),
            max_delay_secs: d_max_delay(),
            velocity_gain: d_velocity_gain(),
        }
    }
}

/// Delay until amplification: uniform in [min, max], divided by the
/// velocity factor when early engagement is known. Result stays within
/// [min, max].
pub fn compute_delay(
    config: &AmplifyConfig,
    early: Option<&EngagementSnapshot>,
    rng: &mut impl Rng,
) -> Duration {
    let min = config.min_delay_secs.min(config.max_delay_secs);
    let max = config.max_delay_secs.max(config.min_delay_secs);
    let base = rng.gen_range(min..=max);
    let secs = match early {
        Some(snapshot) => {
            let factor = 1.0 + config.velocity_gain * (snapshot.rate() / 100.0);
            ((base as f64 / factor) as u64).max(min)
        }
        None => base,
    };
    Duration::from_secs(secs)
}

// ── Scheduler ──

struct SchedulerInner {
    /// Scheduled tasks keyed by (fire time, id). One mutex guards both
    /// firing and cancellation, which is what makes each race-free.
    queue: Mutex<BTreeMap<(i128, String), AmplificationTask>>,
    /// Tasks that reached a terminal status.
    terminal: Mutex<Vec<AmplificationTask>>,
    notify: Notify,
}

/// Single background loop firing follow-up dispatches at their due times.
#[derive(Clone)]
pub struct AmplificationScheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for AmplificationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl AmplificationScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(BTreeMap::new()),
                terminal: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn schedule(&self, task: AmplificationTask) {
        let key = (task.fire_at_nanos, task.id.clone());
        self.inner
            .queue
            .lock()
            .expect("queue lock poisoned")
            .insert(key, task);
        self.inner.notify.notify_one();
    }

    /// Cancel scheduled tasks whose parent was retroactively failed.
    /// Holds the queue lock for the whole removal, so a concurrently
    /// firing task either already popped (and fires) or is cancelled,
    /// never both.
    pub fn cancel_for_parent(&self, parent_post_id: &str) -> usize {
        let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
        let keys: Vec<(i128, String)> = queue
            .iter()
            .filter(|(_, t)| t.parent_post_id == parent_post_id)
            .map(|(k, _)| k.clone())
            .collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some(mut task) = queue.remove(&key) {
                task.status = TaskStatus::Cancelled;
                self.inner
                    .terminal
                    .lock()
                    .expect("terminal lock poisoned")
                    .push(task);
                cancelled += 1;
            }
        }
        drop(queue);
        if cancelled > 0 {
            self.inner.notify.notify_one();
        }
        cancelled
    }

    pub fn scheduled_len(&self) -> usize {
        self.inner.queue.lock().expect("queue lock poisoned").len()
    }

    pub fn terminal_tasks(&self) -> Vec<AmplificationTask> {
        self.inner
            .terminal
            .lock()
            .expect("terminal lock poisoned")
            .clone()
    }

    fn next_fire_at_nanos(&self) -> Option<i128> {
        self.inner
            .queue
            .lock()
            .expect("queue lock poisoned")
            .keys()
            .next()
            .map(|(nanos, _)| *nanos)
    }

    /// Pop the earliest due task, if any. The pop happens under the queue
    /// lock, so concurrent wake-ups cannot both claim the same task.
    fn pop_due(&self, now_nanos: i128) -> Option<AmplificationTask> {
        let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
        let key = queue.keys().next().filter(|k| k.0 <= now_nanos).cloned()?;
        queue.remove(&key)
    }

    fn finish(&self, mut task: AmplificationTask, status: TaskStatus) {
        task.status = status;
        self.inner
            .terminal
            .lock()
            .expect("terminal lock poisoned")
            .push(task);
    }

    /// Fire every task that is due. A single task's failure is recorded
    /// and the rest still run. Returns the number of tasks processed.
    pub async fn fire_due(&self, engine: &DispatchEngine, store: &LearningStore) -> usize {
        let mut processed = 0;
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos();
        while let Some(task) = self.pop_due(now) {
            processed += 1;

            // Parent retroactively failed → the follow-up no longer applies.
            let parent = store.get_post(&task.parent_post_id);
            match parent {
                Some(p) if p.status == PostStatus::Posted => {}
                _ => {
                    tracing::info!(task = %task.id, parent = %task.parent_post_id, "amplification cancelled");
                    self.finish(task, TaskStatus::Cancelled);
                    continue;
                }
            }

            let mut rng = StdRng::from_entropy();
            let text = task.strategy.reply_text(&mut rng);
            let request = DispatchRequest {
                platform: task.platform,
                text,
                image: None,
                in_reply_to: Some(task.parent_ref.clone()),
            };

            match engine.dispatch(&request, None).await {
                Ok(DispatchVerdict::Posted(outcome)) => {
                    tracing::info!(task = %task.id, reply_ref = %outcome.post_ref, "amplification fired");
                    self.finish(task, TaskStatus::Fired);
                }
                Ok(other) => {
                    tracing::warn!(task = %task.id, ?other, "amplification did not post");
                    self.finish(task, TaskStatus::Failed);
                }
                Err(e) => {
                    tracing::warn!(task = %task.id, error = %e, "amplification dispatch failed");
                    self.finish(task, TaskStatus::Failed);
                }
            }
        }
        processed
    }

    /// Background loop: sleep until the nearest due time (or a queue
    /// change), fire everything due, repeat until cancelled.
    pub async fn run(
        &self,
        engine: Arc<DispatchEngine>,
        store: Arc<LearningStore>,
        cancel: CancellationToken,
    ) {
        loop {
            let now = OffsetDateTime::now_utc().unix_timestamp_nanos();
            let sleep_for = match self.next_fire_at_nanos() {
                Some(due) if due <= now => Duration::ZERO,
                Some(due) => Duration::from_nanos((due - now).min(u64::MAX as i128) as u64),
                // Nothing queued: wait for an insert.
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.notify.notified() => continue,
                _ = tokio::time::sleep(sleep_for) => {
                    self.fire_due(&engine, &store).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipcast_core::HookKind;
    use shipcast_dispatch::{DispatchConfig, DispatchError, JitterWindow, MockSession};

    fn quick_engine(mock: &MockSession) -> DispatchEngine {
        mock.set_dom(r#"a[href*="/status/"]"#, "reply-999");
        DispatchEngine::new(
            Box::new(mock.clone()),
            DispatchConfig {
                jitter: JitterWindow::new(1, 3),
                max_submit_attempts: 3,
                backoff_base_ms: 1,
                step_timeout: Duration::from_secs(5),
            },
        )
    }

    fn posted_parent(store: &LearningStore) -> shipcast_store::PostRecord {
        let post = store
            .create_post(
                Platform::Twitter,
                &"carbon-x".to_string(),
                HookKind::FeatureHighlight,
                9,
            )
            .unwrap();
        store.update_status(&post.id, PostStatus::Confirmed).unwrap();
        store.update_status(&post.id, PostStatus::Posted).unwrap();
        store.mark_dispatched(&post.id, "parent-123").unwrap();
        store.get_post(&post.id).unwrap()
    }

    fn due_task(parent: &shipcast_store::PostRecord) -> AmplificationTask {
        AmplificationTask::new(
            &parent.id,
            "parent-123",
            Platform::Twitter,
            OffsetDateTime::now_utc() - time::Duration::hours(3),
            Duration::from_secs(60),
            AmplifyStrategy::Insight,
        )
    }

    #[tokio::test]
    async fn due_task_fires_exactly_once_under_concurrent_wakeups() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningStore::open(dir.path(), 1.0).unwrap();
        let parent = posted_parent(&store);

        let mock = MockSession::new();
        let engine = quick_engine(&mock);
        let scheduler = AmplificationScheduler::new();
        scheduler.schedule(due_task(&parent));

        // Two wake-ups race on the same queue.
        let (a, b) = tokio::join!(
            scheduler.fire_due(&engine, &store),
            scheduler.fire_due(&engine, &store)
        );
        assert_eq!(a + b, 1, "task claimed by exactly one wake-up");

        let fired: Vec<_> = scheduler
            .terminal_tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Fired)
            .collect();
        assert_eq!(fired.len(), 1);

        let submits = mock
            .calls()
            .iter()
            .filter(|c| c.starts_with("click:"))
            .count();
        assert_eq!(submits, 1, "no duplicate dispatch for the same task");
    }

    #[tokio::test]
    async fn cancelled_parent_never_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningStore::open(dir.path(), 1.0).unwrap();
        let parent = posted_parent(&store);

        let scheduler = AmplificationScheduler::new();
        scheduler.schedule(due_task(&parent));
        assert_eq!(scheduler.cancel_for_parent(&parent.id), 1);
        assert_eq!(scheduler.scheduled_len(), 0);

        let mock = MockSession::new();
        let engine = quick_engine(&mock);
        assert_eq!(scheduler.fire_due(&engine, &store).await, 0);
        assert!(mock.calls().is_empty());
        assert_eq!(scheduler.terminal_tasks()[0].status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn failed_parent_cancels_at_fire_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningStore::open(dir.path(), 1.0).unwrap();
        let post = store
            .create_post(
                Platform::Twitter,
                &"carbon-x".to_string(),
                HookKind::Milestone,
                9,
            )
            .unwrap();
        store.update_status(&post.id, PostStatus::Confirmed).unwrap();
        store.update_status(&post.id, PostStatus::Failed).unwrap();
        let parent = store.get_post(&post.id).unwrap();

        let scheduler = AmplificationScheduler::new();
        scheduler.schedule(due_task(&parent));

        let mock = MockSession::new();
        let engine = quick_engine(&mock);
        scheduler.fire_due(&engine, &store).await;

        assert!(mock.calls().is_empty());
        assert_eq!(scheduler.terminal_tasks()[0].status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn one_task_failure_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningStore::open(dir.path(), 1.0).unwrap();
        let parent = posted_parent(&store);

        let mock = MockSession::new();
        // First task exhausts its submit retries; the second then succeeds.
        mock.fail_clicks(
            r#"div[data-testid="tweetButtonInline"]"#,
            vec![
                DispatchError::Network("1".into()),
                DispatchError::Network("2".into()),
                DispatchError::Network("3".into()),
            ],
        );
        let engine = quick_engine(&mock);

        let scheduler = AmplificationScheduler::new();
        scheduler.schedule(due_task(&parent));
        scheduler.schedule(due_task(&parent));

        assert_eq!(scheduler.fire_due(&engine, &store).await, 2);
        let statuses: Vec<TaskStatus> = scheduler
            .terminal_tasks()
            .iter()
            .map(|t| t.status)
            .collect();
        assert!(statuses.contains(&TaskStatus::Failed));
        assert!(statuses.contains(&TaskStatus::Fired));
    }

    #[tokio::test]
    async fn run_loop_fires_when_due() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LearningStore::open(dir.path(), 1.0).unwrap());
        let parent = posted_parent(&store);

        let mock = MockSession::new();
        let engine = Arc::new(quick_engine(&mock));
        let scheduler = AmplificationScheduler::new();
        let cancel = CancellationToken::new();

        let loop_handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let engine = Arc::clone(&engine);
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            async move { scheduler.run(engine, store, cancel).await }
        });

        // Insert a task due 30 ms from now; the loop should pick it up.
        let task = AmplificationTask::new(
            &parent.id,
            "parent-123",
            Platform::Twitter,
            OffsetDateTime::now_utc(),
            Duration::from_millis(30),
            AmplifyStrategy::Teaser,
        );
        scheduler.schedule(task);

        for _ in 0..100 {
            if !scheduler.terminal_tasks().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        loop_handle.await.unwrap();

        assert_eq!(scheduler.terminal_tasks()[0].status, TaskStatus::Fired);
    }

    #[test]
    fn delay_stays_in_window_and_velocity_shortens_it() {
        let config = AmplifyConfig {
            min_delay_secs: 7200,
            max_delay_secs: 14400,
            velocity_gain: 0.5,
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let d = compute_delay(&config, None, &mut rng);
            assert!(d.as_secs() >= 7200 && d.as_secs() <= 14400);
        }

        let hot = EngagementSnapshot {
            likes: 300,
            reposts: 100,
            replies: 50,
            views: 1000,
            taken_at: String::new(),
        };
        let mut rng_a = StdRng::seed_from_u64(5);
        let mut rng_b = StdRng::seed_from_u64(5);
        let base = compute_delay(&config, None, &mut rng_a);
        let pulled = compute_delay(&config, Some(&hot), &mut rng_b);
        assert!(pulled <= base);
        assert!(pulled.as_secs() >= config.min_delay_secs);
    }

    #[test]
    fn strategy_tracks_post_wording() {
        assert_eq!(
            AmplifyStrategy::for_content("New feature launched today"),
            AmplifyStrategy::Teaser
        );
        assert_eq!(
            AmplifyStrategy::for_content("How we built our cache"),
            AmplifyStrategy::Insight
        );
        assert_eq!(
            AmplifyStrategy::for_content("Fixed a nasty bug"),
            AmplifyStrategy::Question
        );
        assert_eq!(
            AmplifyStrategy::for_content("Steady progress"),
            AmplifyStrategy::Thread
        );
    }
}
