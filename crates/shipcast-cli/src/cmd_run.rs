use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use shipcast_core::score::ImpactScorer;
use shipcast_dispatch::driver::ProcessSession;
use shipcast_dispatch::{
    confirm_channel, BrowserSession, ConfirmDecision, DispatchEngine, MockSession,
};
use shipcast_pipeline::{
    AmplificationScheduler, GitCliAnalyzer, HtmlRenderer, Pipeline, RunMode, RunOutcome,
    RunReport, RunRequest, TemplateSelector,
};
use shipcast_store::LearningStore;

use crate::config::AppConfig;

pub struct RunParams {
    pub target: String,
    pub git_ref: Option<String>,
    pub mode: Option<String>,
    pub seed: Option<u64>,
    pub await_amplify: bool,
}

/// Execute `shipcast run <target>`.
pub fn execute(config: &AppConfig, params: RunParams) -> Result<()> {
    let mode: RunMode = match &params.mode {
        Some(m) => m.parse()?,
        None => config.run_mode()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(config, params, mode))
}

async fn run_async(config: &AppConfig, params: RunParams, mode: RunMode) -> Result<()> {
    let store = Arc::new(LearningStore::open(
        &config.store_dir(),
        config.learning.neutral_prior,
    )?);

    let swept = store.sweep_stale_pending()?;
    if !swept.is_empty() {
        println!(
            "Recovered {} interrupted post(s) from a previous session.",
            swept.len()
        );
    }

    let flags = mode.flags();
    // Test mode never touches the browser, so no driver process is spawned.
    let session: Box<dyn BrowserSession> = if flags.dispatch_enabled {
        Box::new(ProcessSession::spawn(
            &config.browser.driver_cmd,
            &config.browser.profile,
            Duration::from_secs(config.browser.command_timeout_secs),
        )?)
    } else {
        Box::new(MockSession::new())
    };
    let engine = Arc::new(DispatchEngine::new(session, config.dispatch_config()));
    let scheduler = AmplificationScheduler::new();

    let pipeline = Pipeline {
        analyzer: Arc::new(GitCliAnalyzer::default()),
        renderer: Arc::new(HtmlRenderer::new(config.artifacts_dir())),
        engine: Arc::clone(&engine),
        store: Arc::clone(&store),
        scheduler: scheduler.clone(),
        scorer: ImpactScorer::new(config.scoring.clone()),
        selector: TemplateSelector::new(config.templates.clone(), config.selector.clone()),
        amplify: config.amplify.clone(),
        platform: config.platform,
        store_dir: config.store_dir(),
        selector_seed: params.seed,
    };

    let request = RunRequest {
        target: params.target,
        git_ref: params.git_ref,
        mode,
    };

    let report = if flags.confirm_required {
        let (handle, mut gate) = confirm_channel();
        // Detached thread: if the run ends before the confirm gate is
        // reached, the pending prompt must not block shutdown.
        std::thread::spawn(move || {
            let decision = prompt_confirm_decision();
            handle.decide_blocking(decision);
        });
        pipeline.run(&request, Some(&mut gate)).await
    } else {
        pipeline.run(&request, None).await
    };

    let posted = matches!(report.outcome, RunOutcome::Posted { .. });
    print_report(&report)?;

    if params.await_amplify && posted {
        println!("Waiting for the scheduled follow-up (Ctrl+C to stop)…");
        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.child_token();
            async move { scheduler.run(engine, store, cancel).await }
        });
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = async {
                while scheduler.scheduled_len() > 0 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            } => {}
        }
        cancel.cancel();
        let _ = loop_handle.await;
    } else if posted && scheduler.scheduled_len() > 0 {
        println!("Note: the follow-up is dropped on exit; pass --await-amplify or use `shipcast serve`.");
    }

    Ok(())
}

fn print_report(report: &RunReport) -> Result<()> {
    match &report.outcome {
        RunOutcome::NothingToPost => {
            println!("Nothing to post — no noteworthy commits.");
        }
        RunOutcome::Rendered {
            artifact,
            template,
            hook,
            caption,
        } => {
            println!("✓ Preview ready (test mode, nothing posted)");
            println!("  Template: {template}");
            println!("  Hook:     {hook}");
            println!("  Artifact: {}", artifact.display());
            println!("\n{caption}");
        }
        RunOutcome::Posted {
            post_id, post_ref, ..
        } => {
            println!("✓ Posted ({post_ref})");
            println!("  Record: {post_id}");
            println!("  Record engagement later: shipcast feedback {post_id} --likes …");
        }
        RunOutcome::DraftSaved { post_id, artifact } => {
            println!("⊘ Draft saved without posting.");
            println!("  Record: {post_id}");
            println!("  Artifact kept at {}", artifact.display());
        }
        RunOutcome::Aborted { post_id, .. } => {
            println!("✗ Aborted by reviewer (record {post_id}).");
        }
        RunOutcome::Failed {
            stage,
            error,
            artifact,
        } => {
            if let Some(path) = artifact {
                eprintln!("  Rendered artifact preserved at {}", path.display());
            }
            bail!("run failed during {stage}: {error}");
        }
    }
    Ok(())
}

/// Stdin prompt for the confirm gate. Exactly three outcomes; anything
/// else re-prompts. EOF counts as abort.
fn prompt_confirm_decision() -> ConfirmDecision {
    use std::io::{BufRead, Write};
    println!("\n  Review the composed post in the browser window.\n");
    println!("  [P] Post   [S] Save draft   [A] Abort");
    loop {
        print!("  > ");
        let _ = std::io::stdout().flush();
        let mut input = String::new();
        match std::io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => return ConfirmDecision::Abort,
            _ => {}
        }
        match input.trim().to_lowercase().as_str() {
            "p" | "post" => return ConfirmDecision::Post,
            "s" | "save" => return ConfirmDecision::SaveDraft,
            "a" | "abort" => return ConfirmDecision::Abort,
            _ => println!("  Invalid choice. Enter P, S, or A."),
        }
    }
}
