use anyhow::{Context, Result};

use shipcast_core::EngagementSnapshot;
use shipcast_store::LearningStore;

use crate::config::AppConfig;

pub struct FeedbackParams {
    pub post_id: String,
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub views: u64,
}

/// Execute `shipcast feedback <post-id>`: fold an engagement snapshot
/// into the learning store.
pub fn execute(config: &AppConfig, params: FeedbackParams) -> Result<()> {
    let store = LearningStore::open(&config.store_dir(), config.learning.neutral_prior)?;

    let snapshot = EngagementSnapshot {
        likes: params.likes,
        reposts: params.reposts,
        replies: params.replies,
        views: params.views,
        taken_at: now_rfc3339(),
    };
    let total = snapshot.total();

    store
        .record_outcome(&params.post_id, snapshot)
        .with_context(|| format!("recording engagement for {}", params.post_id))?;

    let post = store
        .get_post(&params.post_id)
        .expect("post exists after record_outcome");
    let slot = store.lookup_performance(&post.template, post.hook, post.bucket);
    println!(
        "Recorded {total:.0} engagement for {} — {}/{}/{:02} now averages {:.1} over {} post{}.",
        params.post_id,
        post.template,
        post.hook,
        post.bucket,
        slot.mean_engagement,
        slot.posts,
        if slot.posts == 1 { "" } else { "s" }
    );
    Ok(())
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
