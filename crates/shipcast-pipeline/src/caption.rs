use shipcast_core::{CommitRecord, ImpactAssessment};

/// Post caption: headline plus the strongest hook evidence lines.
pub fn build_caption(
    repo_name: &str,
    commit_count: usize,
    assessment: &ImpactAssessment,
    max_hooks: usize,
) -> String {
    let mut caption = format!(
        "🚀 Just pushed {commit_count} commit{} to {repo_name}!\n\n",
        if commit_count == 1 { "" } else { "s" }
    );
    for hook in assessment.hooks.iter().take(max_hooks) {
        caption.push_str("• ");
        caption.push_str(&hook.evidence);
        caption.push('\n');
    }
    caption.push_str("\n#buildinpublic #devlife");
    caption
}

/// Up to three attention lines for the visual template: the busiest file
/// and any breaking-change commit.
pub fn visual_highlights(commits: &[CommitRecord]) -> Vec<String> {
    let mut highlights = Vec::new();

    let mut file_counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for commit in commits {
        for file in &commit.files {
            *file_counts.entry(file.as_str()).or_default() += 1;
        }
    }
    // BTreeMap iteration is path-ordered, so equal counts tie-break stably.
    if let Some((top, _)) = file_counts.iter().max_by_key(|entry| *entry.1) {
        highlights.push(format!("Most active file: {top}"));
    }

    for commit in commits.iter().rev() {
        let lower = commit.message.to_lowercase();
        if ["major", "breaking", "rewrite"].iter().any(|w| lower.contains(w)) {
            let head: String = commit.message.chars().take(50).collect();
            highlights.push(format!("Breaking change: {head}"));
            break;
        }
    }

    highlights.truncate(3);
    highlights
}
