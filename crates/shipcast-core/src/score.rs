use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{CommitRecord, Hook, HookKind, ImpactAssessment, SemanticTag};

// ── Weights ──

/// Per-tag contribution weights. Higher means more marketable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWeights {
    #[serde(default = "d_feature")]
    pub feature: f64,
    #[serde(default = "d_perf")]
    pub perf: f64,
    #[serde(default = "d_fix")]
    pub fix: f64,
    #[serde(default = "d_refactor")]
    pub refactor: f64,
    #[serde(default = "d_test")]
    pub test: f64,
    #[serde(default = "d_docs")]
    pub docs: f64,
    #[serde(default = "d_chore")]
    pub chore: f64,
}

fn d_feature() -> f64 {
    8.0
}
fn d_perf() -> f64 {
    8.0
}
fn d_fix() -> f64 {
    5.0
}
fn d_refactor() -> f64 {
    3.0
}
fn d_test() -> f64 {
    2.0
}
fn d_docs() -> f64 {
    1.0
}
fn d_chore() -> f64 {
    1.0
}

impl Default for TagWeights {
    fn default() -> Self {
        Self {
            feature: d_feature(),
            perf: d_perf(),
            fix: d_fix(),
            refactor: d_refactor(),
            test: d_test(),
            docs: d_docs(),
            chore: d_chore(),
        }
    }
}

impl TagWeights {
    pub fn weight_for(&self, tag: SemanticTag) -> f64 {
        match tag {
            SemanticTag::Feature => self.feature,
            SemanticTag::Perf => self.perf,
            SemanticTag::Fix => self.fix,
            SemanticTag::Refactor => self.refactor,
            SemanticTag::Test => self.test,
            SemanticTag::Docs => self.docs,
            SemanticTag::Chore => self.chore,
        }
    }
}

/// Scoring factor weights. All factors enter the score linearly, so the
/// score is monotonic in each factor holding the others fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Multiplier for log2-scaled total line delta.
    #[serde(default = "d_magnitude")]
    pub magnitude: f64,
    /// Multiplier for the count of distinct files touched.
    #[serde(default = "d_breadth")]
    pub breadth: f64,
    /// Multiplier for the summed per-tag weights.
    #[serde(default = "d_tags")]
    pub tags: f64,
    #[serde(default)]
    pub tag_weights: TagWeights,
    /// Minimum single-commit line delta for magnitude-gated hooks.
    #[serde(default = "d_big_commit")]
    pub big_commit_lines: u64,
    /// Commit count at which the "milestone" hook triggers.
    #[serde(default = "d_milestone")]
    pub milestone_commits: usize,
}

fn d_magnitude() -> f64 {
    6.0
}
fn d_breadth() -> f64 {
    2.0
}
fn d_tags() -> f64 {
    1.5
}
fn d_big_commit() -> u64 {
    50
}
fn d_milestone() -> usize {
    10
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            magnitude: d_magnitude(),
            breadth: d_breadth(),
            tags: d_tags(),
            tag_weights: TagWeights::default(),
            big_commit_lines: d_big_commit(),
            milestone_commits: d_milestone(),
        }
    }
}

// ── Scorer ──

/// Converts a chronological commit set into a bounded impact score plus
/// ranked narrative hooks.
#[derive(Debug, Clone, Default)]
pub struct ImpactScorer {
    pub weights: ScoreWeights,
}

impl ImpactScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Empty input yields score 0 and no hooks ("nothing to post").
    pub fn assess(&self, commits: &[CommitRecord]) -> ImpactAssessment {
        if commits.is_empty() {
            return ImpactAssessment::empty();
        }

        let score = self.score(commits);
        let mut hooks = self.generate_hooks(commits);
        rank_hooks(&mut hooks);

        ImpactAssessment { score, hooks }
    }

    fn score(&self, commits: &[CommitRecord]) -> f64 {
        let w = &self.weights;

        let total_delta: u64 = commits.iter().map(|c| c.line_delta()).sum();
        let magnitude = ((1 + total_delta) as f64).log2();

        let files: BTreeSet<&str> = commits
            .iter()
            .flat_map(|c| c.files.iter().map(String::as_str))
            .collect();
        let breadth = files.len() as f64;

        let tag_sum: f64 = commits
            .iter()
            .flat_map(|c| c.tags.iter())
            .map(|t| w.tag_weights.weight_for(*t))
            .sum();

        let raw = magnitude * w.magnitude + breadth * w.breadth + tag_sum * w.tags;
        raw.clamp(0.0, 100.0)
    }

    /// Fixed rule table over tag counts and magnitude thresholds.
    fn generate_hooks(&self, commits: &[CommitRecord]) -> Vec<Hook> {
        let w = &self.weights;
        let mut hooks = Vec::new();

        let latest_with = |tag: SemanticTag| -> Option<&CommitRecord> {
            commits.iter().rev().find(|c| c.has_tag(tag))
        };
        let count_with = |tag: SemanticTag| commits.iter().filter(|c| c.has_tag(tag)).count();

        let feature_count = count_with(SemanticTag::Feature);
        if feature_count > 0 {
            let delta: u64 = commits
                .iter()
                .filter(|c| c.has_tag(SemanticTag::Feature))
                .map(|c| c.line_delta())
                .sum();
            let latest = latest_with(SemanticTag::Feature).expect("feature commit exists");
            hooks.push(Hook {
                kind: HookKind::FeatureHighlight,
                evidence: format!(
                    "{feature_count} new feature{} shipped",
                    plural(feature_count)
                ),
                weight: w.tag_weights.feature * feature_count as f64
                    + ((1 + delta) as f64).log2(),
                supporting_ts: latest.ts.clone(),
            });
        }

        // Performance hooks are only credible when the change is substantial.
        if let Some(perf) = commits
            .iter()
            .rev()
            .find(|c| c.has_tag(SemanticTag::Perf) && c.line_delta() >= w.big_commit_lines)
        {
            let perf_count = count_with(SemanticTag::Perf);
            hooks.push(Hook {
                kind: HookKind::PerformanceWin,
                evidence: format!(
                    "performance work across {perf_count} commit{}",
                    plural(perf_count)
                ),
                weight: w.tag_weights.perf * perf_count as f64
                    + ((1 + perf.line_delta()) as f64).log2(),
                supporting_ts: perf.ts.clone(),
            });
        }

        let fix_count = count_with(SemanticTag::Fix);
        if fix_count >= 2 {
            let latest = latest_with(SemanticTag::Fix).expect("fix commit exists");
            hooks.push(Hook {
                kind: HookKind::BugPurge,
                evidence: format!("{fix_count} bugs squashed"),
                weight: w.tag_weights.fix * fix_count as f64,
                supporting_ts: latest.ts.clone(),
            });
        }

        let refactor_count = count_with(SemanticTag::Refactor);
        if refactor_count > 0 {
            let latest = latest_with(SemanticTag::Refactor).expect("refactor commit exists");
            hooks.push(Hook {
                kind: HookKind::RefactorStory,
                evidence: format!(
                    "{refactor_count} refactor{} cleaning up the codebase",
                    plural(refactor_count)
                ),
                weight: w.tag_weights.refactor * refactor_count as f64,
                supporting_ts: latest.ts.clone(),
            });
        }

        if commits.len() >= w.milestone_commits {
            let latest = commits.last().expect("non-empty");
            hooks.push(Hook {
                kind: HookKind::Milestone,
                evidence: format!("{} commits and counting", commits.len()),
                weight: commits.len() as f64,
                supporting_ts: latest.ts.clone(),
            });
        }

        if hooks.is_empty() {
            let latest = commits.last().expect("non-empty");
            hooks.push(Hook {
                kind: HookKind::SteadyProgress,
                evidence: format!(
                    "{} commit{} pushing the codebase forward",
                    commits.len(),
                    plural(commits.len())
                ),
                weight: 1.0,
                supporting_ts: latest.ts.clone(),
            });
        }

        hooks
    }
}

/// Highest weight first; ties go to the hook with the most recent
/// supporting commit (RFC3339 strings compare chronologically).
fn rank_hooks(hooks: &mut [Hook]) {
    hooks.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.supporting_ts.cmp(&a.supporting_ts))
    });
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
