use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shipcast_core::score::ImpactScorer;
use shipcast_dispatch::driver::ProcessSession;
use shipcast_dispatch::DispatchEngine;
use shipcast_pipeline::{
    run_worker, AmplificationScheduler, GitCliAnalyzer, HtmlRenderer, Pipeline, TemplateSelector,
};
use shipcast_serve::ServeConfig;
use shipcast_store::LearningStore;

use crate::config::AppConfig;

/// Execute `shipcast serve`: webhook listener plus the amplification
/// loop, until Ctrl+C.
pub fn execute(config: &AppConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve_async(config, bind, port))
}

async fn serve_async(config: &AppConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
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

    let session = ProcessSession::spawn(
        &config.browser.driver_cmd,
        &config.browser.profile,
        Duration::from_secs(config.browser.command_timeout_secs),
    )?;
    let engine = Arc::new(DispatchEngine::new(
        Box::new(session),
        config.dispatch_config(),
    ));
    let scheduler = AmplificationScheduler::new();

    let pipeline = Arc::new(Pipeline {
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
        selector_seed: None,
    });

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);

    let worker = tokio::spawn(run_worker(pipeline, rx, cancel.child_token()));
    let amplifier = tokio::spawn({
        let scheduler = scheduler.clone();
        let engine = Arc::clone(&engine);
        let store = Arc::clone(&store);
        let cancel = cancel.child_token();
        async move { scheduler.run(engine, store, cancel).await }
    });

    let serve_config = ServeConfig {
        bind: bind.unwrap_or_else(|| config.webhook.bind.clone()),
        port: port.unwrap_or(config.webhook.port),
        secret: config.webhook.secret.clone(),
    };

    let result = tokio::select! {
        result = shipcast_serve::serve(serve_config, tx) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down.");
            Ok(())
        }
    };

    cancel.cancel();
    let _ = worker.await;
    let _ = amplifier.await;
    result
}
