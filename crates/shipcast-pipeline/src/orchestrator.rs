use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shipcast_core::score::ImpactScorer;
use shipcast_core::seed::{entropy_seed, rng_seed};
use shipcast_core::Platform;
use shipcast_dispatch::{ConfirmGate, DispatchEngine, DispatchRequest, DispatchVerdict};
use shipcast_store::{LearningStore, PostStatus};

use crate::amplify::{
    compute_delay, AmplificationScheduler, AmplificationTask, AmplifyConfig, AmplifyStrategy,
};
use crate::analyze::Analyzer;
use crate::caption;
use crate::event_log::{Event, EventLogger};
use crate::render::{RenderData, Renderer};
use crate::selector::TemplateSelector;

// ── Modes ──

/// Only the orchestrator knows the mode; everything downstream receives
/// flags derived from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Render only. No dispatch, no learning writes.
    Test,
    /// Full pipeline with the human confirm gate active.
    Confirm,
    /// Full pipeline, confirm bypassed.
    Auto,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Test => "test",
            RunMode::Confirm => "confirm",
            RunMode::Auto => "auto",
        }
    }

    pub fn flags(&self) -> RunFlags {
        match self {
            RunMode::Test => RunFlags {
                dispatch_enabled: false,
                confirm_required: false,
                learning_writes: false,
            },
            RunMode::Confirm => RunFlags {
                dispatch_enabled: true,
                confirm_required: true,
                learning_writes: true,
            },
            RunMode::Auto => RunFlags {
                dispatch_enabled: true,
                confirm_required: false,
                learning_writes: true,
            },
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(RunMode::Test),
            "confirm" => Ok(RunMode::Confirm),
            "auto" => Ok(RunMode::Auto),
            other => anyhow::bail!("unknown mode {other:?} (expected test, confirm, or auto)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunFlags {
    pub dispatch_enabled: bool,
    pub confirm_required: bool,
    pub learning_writes: bool,
}

// ── Requests and reports ──

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Local repository path or remote URL.
    pub target: String,
    pub git_ref: Option<String>,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Analyze,
    Score,
    Select,
    Render,
    Dispatch,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Analyze => "analyze",
            RunStage::Score => "score",
            RunStage::Select => "select",
            RunStage::Render => "render",
            RunStage::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended. Failures carry the stage and any preserved artifact.
#[derive(Debug)]
pub enum RunOutcome {
    NothingToPost,
    Rendered {
        artifact: PathBuf,
        template: String,
        hook: String,
        caption: String,
    },
    Posted {
        post_id: String,
        post_ref: String,
        artifact: PathBuf,
    },
    DraftSaved {
        post_id: String,
        artifact: PathBuf,
    },
    Aborted {
        post_id: String,
        artifact: PathBuf,
    },
    Failed {
        stage: RunStage,
        error: String,
        artifact: Option<PathBuf>,
    },
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
}

// ── Pipeline ──

/// Sequences Analyze → Score → Select → Render → Dispatch and hands
/// successful posts to the amplification scheduler.
pub struct Pipeline {
    pub analyzer: Arc<dyn Analyzer>,
    pub renderer: Arc<dyn Renderer>,
    pub engine: Arc<DispatchEngine>,
    pub store: Arc<LearningStore>,
    pub scheduler: AmplificationScheduler,
    pub scorer: ImpactScorer,
    pub selector: TemplateSelector,
    pub amplify: AmplifyConfig,
    pub platform: Platform,
    /// Where run event logs live (normally the store dir).
    pub store_dir: PathBuf,
    /// Fixed selection seed for reproducible runs. Unset → OS entropy,
    /// except in test mode where the head commit hash seeds selection so
    /// repeated test runs stay stable.
    pub selector_seed: Option<u64>,
}

impl Pipeline {
    pub async fn run(&self, req: &RunRequest, confirm: Option<&mut ConfirmGate>) -> RunReport {
        let run_id = ulid::Ulid::new().to_string();
        let flags = req.mode.flags();
        let mut log = EventLogger::new(&self.store_dir, &run_id);
        log.record(Event::RunStart {
            target: req.target.clone(),
            mode: req.mode.as_str().to_string(),
        });
        tracing::info!(run = %run_id, target = %req.target, mode = req.mode.as_str(), "pipeline run starting");

        // Analyze
        let commits = match self
            .analyzer
            .commits(&req.target, req.git_ref.as_deref())
            .await
        {
            Ok(commits) => commits,
            Err(e) => return fail(&mut log, run_id, RunStage::Analyze, e.to_string(), None),
        };

        // Score
        let assessment = self.scorer.assess(&commits);
        log.record(Event::Scored {
            score: assessment.score,
            hook_count: assessment.hooks.len(),
        });
        if assessment.is_empty() {
            log.record(Event::NothingToPost);
            return RunReport {
                run_id,
                outcome: RunOutcome::NothingToPost,
            };
        }
        let head = commits.last().expect("assessed commits are non-empty").hash.clone();

        // Select
        let mut rng = match self.selector_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None if req.mode == RunMode::Test => StdRng::seed_from_u64(rng_seed(&head)),
            None => StdRng::from_entropy(),
        };
        let Some(selection) = self.selector.select(&assessment, &self.store, &mut rng) else {
            return fail(
                &mut log,
                run_id,
                RunStage::Select,
                "no templates registered".into(),
                None,
            );
        };
        log.record(Event::Selected {
            template: selection.template.clone(),
            hook: selection.hook.to_string(),
            bucket: selection.bucket,
        });

        // Render
        let hook = assessment
            .hooks
            .iter()
            .find(|h| h.kind == selection.hook)
            .expect("selected hook comes from the assessment")
            .clone();
        let data = RenderData {
            repo_name: repo_name_from_target(&req.target),
            hook,
            score: assessment.score,
            commit_count: commits.len(),
            head_hash: head.clone(),
            highlights: caption::visual_highlights(&commits),
        };
        let artifact = match self
            .renderer
            .render(&selection.template, &data, entropy_seed(&head))
            .await
        {
            Ok(path) => path,
            Err(e) => return fail(&mut log, run_id, RunStage::Render, e.to_string(), None),
        };
        log.record(Event::Rendered {
            artifact: artifact.display().to_string(),
        });

        let text = caption::build_caption(&data.repo_name, commits.len(), &assessment, 3);

        if !flags.dispatch_enabled {
            log.record(Event::RunCompleted);
            return RunReport {
                run_id,
                outcome: RunOutcome::Rendered {
                    artifact,
                    template: selection.template,
                    hook: selection.hook.to_string(),
                    caption: text,
                },
            };
        }

        // Dispatch
        let post = match self.store.create_post(
            self.platform,
            &selection.template,
            selection.hook,
            selection.bucket,
        ) {
            Ok(post) => post,
            Err(e) => {
                return fail(
                    &mut log,
                    run_id,
                    RunStage::Dispatch,
                    e.to_string(),
                    Some(artifact),
                )
            }
        };

        let request = DispatchRequest {
            platform: self.platform,
            text: text.clone(),
            image: Some(artifact.clone()),
            in_reply_to: None,
        };
        debug_assert!(flags.confirm_required == confirm.is_some());
        match self.engine.dispatch(&request, confirm).await {
            Ok(DispatchVerdict::Posted(outcome)) => {
                let lifecycle = self
                    .store
                    .update_status(&post.id, PostStatus::Confirmed)
                    .and_then(|_| self.store.mark_dispatched(&post.id, &outcome.post_ref))
                    .and_then(|_| self.store.update_status(&post.id, PostStatus::Posted));
                if let Err(e) = lifecycle {
                    return fail(
                        &mut log,
                        run_id,
                        RunStage::Dispatch,
                        e.to_string(),
                        Some(artifact),
                    );
                }
                log.record(Event::DispatchSucceeded {
                    post_id: post.id.clone(),
                    post_ref: outcome.post_ref.clone(),
                    submit_attempts: outcome.submit_attempts,
                });

                // Seed the follow-up. Early engagement is unknown at
                // dispatch time; the delay uses the base window.
                let mut delay_rng = StdRng::from_entropy();
                let delay = compute_delay(&self.amplify, None, &mut delay_rng);
                let task = AmplificationTask::new(
                    &post.id,
                    &outcome.post_ref,
                    self.platform,
                    OffsetDateTime::now_utc(),
                    delay,
                    AmplifyStrategy::for_content(&text),
                );
                log.record(Event::AmplifyScheduled {
                    task_id: task.id.clone(),
                    parent_post_id: post.id.clone(),
                    fire_at: format_rfc3339(task.fire_at()),
                });
                self.scheduler.schedule(task);

                log.record(Event::RunCompleted);
                RunReport {
                    run_id,
                    outcome: RunOutcome::Posted {
                        post_id: post.id,
                        post_ref: outcome.post_ref,
                        artifact,
                    },
                }
            }
            Ok(DispatchVerdict::DraftSaved) => {
                record_terminal(&self.store, &post.id, PostStatus::Skipped);
                log.record(Event::DraftSaved {
                    post_id: post.id.clone(),
                });
                log.record(Event::RunCompleted);
                RunReport {
                    run_id,
                    outcome: RunOutcome::DraftSaved {
                        post_id: post.id,
                        artifact,
                    },
                }
            }
            Ok(DispatchVerdict::Aborted) => {
                record_terminal(&self.store, &post.id, PostStatus::Skipped);
                log.record(Event::DispatchAborted {
                    post_id: post.id.clone(),
                });
                log.record(Event::RunCompleted);
                RunReport {
                    run_id,
                    outcome: RunOutcome::Aborted {
                        post_id: post.id,
                        artifact,
                    },
                }
            }
            Err(e) => {
                // The dispatch was committed and lost: confirmed → failed.
                record_terminal(&self.store, &post.id, PostStatus::Confirmed);
                record_terminal(&self.store, &post.id, PostStatus::Failed);
                log.record(Event::DispatchFailed {
                    post_id: post.id.clone(),
                    error: e.to_string(),
                });
                fail(
                    &mut log,
                    run_id,
                    RunStage::Dispatch,
                    e.to_string(),
                    Some(artifact),
                )
            }
        }
    }
}

fn fail(
    log: &mut EventLogger,
    run_id: String,
    stage: RunStage,
    error: String,
    artifact: Option<PathBuf>,
) -> RunReport {
    tracing::error!(run = %run_id, stage = %stage, error = %error, "pipeline run failed");
    log.record(Event::RunFailed {
        stage: stage.as_str().to_string(),
        error: error.clone(),
    });
    RunReport {
        run_id,
        outcome: RunOutcome::Failed {
            stage,
            error,
            artifact,
        },
    }
}

/// Store transitions on the failure/skip paths must not mask the dispatch
/// outcome, so errors are logged instead of propagated.
fn record_terminal(store: &LearningStore, post_id: &str, to: PostStatus) {
    if let Err(e) = store.update_status(post_id, to) {
        tracing::error!(post = %post_id, error = %e, "post lifecycle update failed");
    }
}

fn repo_name_from_target(target: &str) -> String {
    target
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("repository")
        .to_string()
}

fn format_rfc3339(t: OffsetDateTime) -> String {
    t.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Consume webhook-originated run requests until the channel closes or
/// shutdown is requested. Webhook runs are always auto mode, so no
/// confirm gate exists here.
pub async fn run_worker(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<RunRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            req = rx.recv() => {
                let Some(req) = req else { break };
                let report = pipeline.run(&req, None).await;
                tracing::info!(run = %report.run_id, outcome = ?report.outcome, "webhook run finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::StaticAnalyzer;
    use crate::render::MockRenderer;
    use crate::selector::SelectorConfig;
    use shipcast_core::score::ScoreWeights;
    use shipcast_core::{CommitRecord, HookKind, SemanticTag};
    use shipcast_dispatch::{
        confirm_channel, ConfirmDecision, DispatchConfig, JitterWindow, MockSession,
    };
    use std::path::Path;
    use std::time::Duration;

    fn commit(hash: &str, tags: Vec<SemanticTag>, added: u64, file: &str, ts: &str) -> CommitRecord {
        CommitRecord {
            hash: hash.into(),
            message: format!("commit {hash}"),
            author: "dev".into(),
            ts: ts.into(),
            files: vec![file.into()],
            added,
            removed: 0,
            tags,
        }
    }

    /// 3 large feature commits, 2 tiny chores.
    fn feature_heavy_commits() -> Vec<CommitRecord> {
        vec![
            commit("a1", vec![SemanticTag::Feature], 400, "src/a.rs", "2026-01-01T00:00:00Z"),
            commit("b2", vec![SemanticTag::Feature], 350, "src/b.rs", "2026-01-02T00:00:00Z"),
            commit("c3", vec![SemanticTag::Feature], 300, "src/c.rs", "2026-01-03T00:00:00Z"),
            commit("d4", vec![SemanticTag::Chore], 2, "Cargo.toml", "2026-01-04T00:00:00Z"),
            commit("e5", vec![SemanticTag::Chore], 1, ".gitignore", "2026-01-05T00:00:00Z"),
        ]
    }

    struct Fixture {
        pipeline: Pipeline,
        session: MockSession,
        renderer: MockRenderer,
    }

    fn fixture(dir: &Path, commits: Vec<CommitRecord>) -> Fixture {
        let session = MockSession::new();
        session.set_dom(r#"a[href*="/status/"]"#, "9876543210");
        let renderer = MockRenderer::new(dir);
        let store = Arc::new(LearningStore::open(&dir.join("store"), 1.0).unwrap());
        let engine = Arc::new(DispatchEngine::new(
            Box::new(session.clone()),
            DispatchConfig {
                jitter: JitterWindow::new(1, 3),
                max_submit_attempts: 3,
                backoff_base_ms: 1,
                step_timeout: Duration::from_secs(5),
            },
        ));
        let pipeline = Pipeline {
            analyzer: Arc::new(StaticAnalyzer { commits }),
            renderer: Arc::new(renderer.clone()),
            engine,
            store,
            scheduler: AmplificationScheduler::new(),
            scorer: ImpactScorer::new(ScoreWeights::default()),
            selector: TemplateSelector::new(
                vec!["carbon-x".into(), "bento-metrics".into()],
                SelectorConfig {
                    epsilon: 0.15,
                    top_hooks: 3,
                    posting_hour: Some(9),
                },
            ),
            amplify: AmplifyConfig::default(),
            platform: Platform::Twitter,
            store_dir: dir.join("store"),
            selector_seed: Some(42),
        };
        Fixture {
            pipeline,
            session,
            renderer,
        }
    }

    fn request(mode: RunMode) -> RunRequest {
        RunRequest {
            target: "/work/widgetd".into(),
            git_ref: None,
            mode,
        }
    }

    #[tokio::test]
    async fn test_mode_renders_without_dispatch_or_learning() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), feature_heavy_commits());

        let report = fx.pipeline.run(&request(RunMode::Test), None).await;
        let RunOutcome::Rendered { hook, caption, .. } = &report.outcome else {
            panic!("expected Rendered, got {:?}", report.outcome);
        };

        // Big feature diff dominates the narrative.
        assert_eq!(hook, "feature-highlight");
        assert!(caption.contains("widgetd"));

        // The renderer ran with that hook…
        let calls = fx.renderer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, HookKind::FeatureHighlight);

        // …and nothing touched the browser or the learning store.
        assert!(fx.session.calls().is_empty());
        assert_eq!(fx.pipeline.store.recorded_slots(), 0);
        assert_eq!(fx.pipeline.store.insights().total_posts, 0);
    }

    #[tokio::test]
    async fn test_mode_score_clears_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), feature_heavy_commits());
        let assessment = fx.pipeline.scorer.assess(&feature_heavy_commits());
        assert!(assessment.score > 50.0, "score {} too low", assessment.score);
    }

    #[tokio::test]
    async fn auto_mode_posts_and_schedules_amplification() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), feature_heavy_commits());

        let report = fx.pipeline.run(&request(RunMode::Auto), None).await;
        let RunOutcome::Posted {
            post_id, post_ref, ..
        } = &report.outcome
        else {
            panic!("expected Posted, got {:?}", report.outcome);
        };

        assert_eq!(post_ref, "9876543210");
        let post = fx.pipeline.store.get_post(post_id).unwrap();
        assert_eq!(post.status, PostStatus::Posted);
        assert_eq!(post.post_ref.as_deref(), Some("9876543210"));
        assert_eq!(fx.pipeline.scheduler.scheduled_len(), 1);
    }

    #[tokio::test]
    async fn confirm_mode_draft_saves_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), feature_heavy_commits());
        let (handle, mut gate) = confirm_channel();
        handle.decide(ConfirmDecision::SaveDraft).await;

        let report = fx
            .pipeline
            .run(&request(RunMode::Confirm), Some(&mut gate))
            .await;
        let RunOutcome::DraftSaved { post_id, artifact } = &report.outcome else {
            panic!("expected DraftSaved, got {:?}", report.outcome);
        };

        assert_eq!(
            fx.pipeline.store.get_post(post_id).unwrap().status,
            PostStatus::Skipped
        );
        // The rendered artifact is preserved for the human.
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn dispatch_failure_marks_post_failed_and_keeps_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path(), feature_heavy_commits());
        let failing = MockSession::without_session();
        fx.pipeline.engine = Arc::new(DispatchEngine::new(
            Box::new(failing),
            DispatchConfig {
                jitter: JitterWindow::new(1, 3),
                ..DispatchConfig::default()
            },
        ));

        let report = fx.pipeline.run(&request(RunMode::Auto), None).await;
        let RunOutcome::Failed {
            stage, artifact, ..
        } = &report.outcome
        else {
            panic!("expected Failed, got {:?}", report.outcome);
        };

        assert_eq!(*stage, RunStage::Dispatch);
        assert!(artifact.is_some(), "artifact must be reported as preserved");
        let failed = fx.pipeline.store.posts_with_status(PostStatus::Failed);
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn empty_commit_set_is_nothing_to_post() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), vec![]);
        let report = fx.pipeline.run(&request(RunMode::Auto), None).await;
        assert!(matches!(report.outcome, RunOutcome::NothingToPost));
        assert!(fx.session.calls().is_empty());
    }

    #[tokio::test]
    async fn analyzer_failure_fails_the_analyze_stage() {
        struct BrokenAnalyzer;
        #[async_trait::async_trait]
        impl Analyzer for BrokenAnalyzer {
            async fn commits(
                &self,
                _target: &str,
                _git_ref: Option<&str>,
            ) -> anyhow::Result<Vec<CommitRecord>> {
                anyhow::bail!("clone failed: host unreachable")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut fx = fixture(dir.path(), vec![]);
        fx.pipeline.analyzer = Arc::new(BrokenAnalyzer);

        let report = fx.pipeline.run(&request(RunMode::Auto), None).await;
        let RunOutcome::Failed { stage, error, .. } = &report.outcome else {
            panic!("expected Failed, got {:?}", report.outcome);
        };
        assert_eq!(*stage, RunStage::Analyze);
        assert!(error.contains("clone failed"));
    }

    #[tokio::test]
    async fn render_failure_fails_the_render_stage() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path(), feature_heavy_commits());
        fx.renderer.fail_next();

        let report = fx.pipeline.run(&request(RunMode::Test), None).await;
        let RunOutcome::Failed { stage, .. } = &report.outcome else {
            panic!("expected Failed, got {:?}", report.outcome);
        };
        assert_eq!(*stage, RunStage::Render);
    }

    #[test]
    fn repo_name_handles_paths_and_urls() {
        assert_eq!(repo_name_from_target("/work/widgetd"), "widgetd");
        assert_eq!(
            repo_name_from_target("https://github.com/acme/widgetd.git"),
            "widgetd"
        );
        assert_eq!(repo_name_from_target("git@github.com:acme/widgetd"), "widgetd");
        assert_eq!(repo_name_from_target("/work/widgetd/"), "widgetd");
    }

    #[test]
    fn mode_flags_follow_the_mode() {
        assert!(!RunMode::Test.flags().dispatch_enabled);
        assert!(!RunMode::Test.flags().learning_writes);
        assert!(RunMode::Confirm.flags().confirm_required);
        assert!(RunMode::Auto.flags().dispatch_enabled);
        assert!(!RunMode::Auto.flags().confirm_required);
    }

    #[test]
    fn run_mode_parses_from_str() {
        assert_eq!("auto".parse::<RunMode>().unwrap(), RunMode::Auto);
        assert!("yolo".parse::<RunMode>().is_err());
    }
}
