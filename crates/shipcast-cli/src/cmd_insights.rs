use anyhow::Result;

use shipcast_store::LearningStore;

use crate::config::AppConfig;

/// Execute `shipcast insights`.
pub fn execute(config: &AppConfig) -> Result<()> {
    let store = LearningStore::open(&config.store_dir(), config.learning.neutral_prior)?;
    let insights = store.insights();

    if insights.total_posts == 0 {
        println!("No data yet. Start posting to gather insights.");
        return Ok(());
    }

    println!("Shipcast learning insights\n");
    println!(
        "  Posts:            {} ({} posted, {} failed)",
        insights.total_posts, insights.posted, insights.failed
    );
    println!("  Total engagement: {:.0}", insights.total_engagement);
    if insights.total_posts > 0 {
        println!(
            "  Avg engagement:   {:.1}",
            insights.total_engagement / insights.total_posts as f64
        );
    }
    match &insights.best_slot {
        Some(best) => println!(
            "  Best slot:        {} — {:.1} avg over {} post{}",
            best.slot,
            best.mean_engagement,
            best.posts,
            if best.posts == 1 { "" } else { "s" }
        ),
        None => println!("  Best slot:        (no engagement recorded yet)"),
    }
    Ok(())
}
