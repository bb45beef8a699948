use serde::{Deserialize, Serialize};
use shipcast_core::{EngagementSnapshot, HookKind, Platform, TemplateId};
use thiserror::Error;

// ── Errors ──

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("post not found: {0}")]
    NotFound(String),
    #[error("invalid transition: {post_id} {from:?} → {to:?}")]
    InvalidTransition {
        post_id: String,
        from: PostStatus,
        to: PostStatus,
    },
    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("corrupt store: {0}")]
    Encoding(#[from] serde_json::Error),
}

// ── Post lifecycle ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Confirmed,
    Posted,
    Failed,
    Skipped,
}

const VALID_TRANSITIONS: &[(PostStatus, &[PostStatus])] = &[
    (
        PostStatus::Pending,
        &[PostStatus::Confirmed, PostStatus::Skipped],
    ),
    (
        PostStatus::Confirmed,
        &[PostStatus::Posted, PostStatus::Failed],
    ),
    // Posted, Failed, and Skipped are terminal
];

pub fn is_valid_transition(from: PostStatus, to: PostStatus) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Posted | PostStatus::Failed | PostStatus::Skipped
        )
    }
}

// ── Records ──

/// One dispatched (or attempted) post. Owned exclusively by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub platform: Platform,
    pub template: TemplateId,
    pub hook: HookKind,
    /// Hour-of-day bucket the selection was made for.
    pub bucket: u8,
    pub created_at: String,
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<String>,
    /// Platform-side reference (tweet id / update urn), set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementSnapshot>,
}

/// Running aggregate for one (template, hook, bucket) slot.
/// Mean and m2 are maintained incrementally (Welford); the count only
/// ever increases.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceRecord {
    pub posts: u64,
    pub mean_engagement: f64,
    pub m2: f64,
}

impl PerformanceRecord {
    /// Synthesized record for slots with no history. The optimistic prior
    /// keeps untried combinations competitive during selection.
    pub fn neutral(prior: f64) -> Self {
        Self {
            posts: 0,
            mean_engagement: prior,
            m2: 0.0,
        }
    }

    /// Fold one engagement total into the aggregate.
    pub fn fold(&mut self, engagement: f64) {
        self.posts += 1;
        let delta = engagement - self.mean_engagement;
        self.mean_engagement += delta / self.posts as f64;
        self.m2 += delta * (engagement - self.mean_engagement);
    }

    /// Replace a previously folded value without changing the count.
    /// Used when a post's engagement snapshot is refreshed.
    pub fn replace(&mut self, old: f64, new: f64) {
        debug_assert!(self.posts > 0, "replace on empty aggregate");
        if self.posts == 0 {
            return;
        }
        // Reverse-Welford removal of `old`, then a normal fold of `new`.
        let n = self.posts as f64;
        if self.posts == 1 {
            self.mean_engagement = new;
            self.m2 = 0.0;
            return;
        }
        let mean_without = (self.mean_engagement * n - old) / (n - 1.0);
        self.m2 -= (old - self.mean_engagement) * (old - mean_without);
        self.m2 = self.m2.max(0.0);
        self.mean_engagement = mean_without;
        self.posts -= 1;
        self.fold(new);
    }

    /// Sample variance. Fewer than two samples → 0.
    pub fn variance(&self) -> f64 {
        if self.posts < 2 {
            0.0
        } else {
            self.m2 / (self.posts - 1) as f64
        }
    }
}

/// Key for a performance slot, encoded as `template/hook/bucket` in the
/// snapshot's JSON map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PerformanceKey {
    pub template: TemplateId,
    pub hook: HookKind,
    pub bucket: u8,
}

impl PerformanceKey {
    pub fn new(template: impl Into<TemplateId>, hook: HookKind, bucket: u8) -> Self {
        Self {
            template: template.into(),
            hook,
            bucket,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}/{}/{:02}", self.template, self.hook, self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_table_accepts_spec_paths() {
        assert!(is_valid_transition(PostStatus::Pending, PostStatus::Confirmed));
        assert!(is_valid_transition(PostStatus::Pending, PostStatus::Skipped));
        assert!(is_valid_transition(PostStatus::Confirmed, PostStatus::Posted));
        assert!(is_valid_transition(PostStatus::Confirmed, PostStatus::Failed));
    }

    #[test]
    fn lifecycle_table_rejects_everything_else() {
        let all = [
            PostStatus::Pending,
            PostStatus::Confirmed,
            PostStatus::Posted,
            PostStatus::Failed,
            PostStatus::Skipped,
        ];
        let allowed = [
            (PostStatus::Pending, PostStatus::Confirmed),
            (PostStatus::Pending, PostStatus::Skipped),
            (PostStatus::Confirmed, PostStatus::Posted),
            (PostStatus::Confirmed, PostStatus::Failed),
        ];
        for from in all {
            for to in all {
                let expect = allowed.contains(&(from, to));
                assert_eq!(
                    is_valid_transition(from, to),
                    expect,
                    "{from:?} → {to:?}"
                );
            }
        }
    }

    #[test]
    fn welford_matches_direct_mean() {
        let mut rec = PerformanceRecord::default();
        for v in [10.0, 20.0, 30.0, 40.0] {
            rec.fold(v);
        }
        assert_eq!(rec.posts, 4);
        assert!((rec.mean_engagement - 25.0).abs() < 1e-9);
        // Sample variance of {10,20,30,40} is 500/3.
        assert!((rec.variance() - 500.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn replace_keeps_count_and_fixes_mean() {
        let mut rec = PerformanceRecord::default();
        rec.fold(10.0);
        rec.fold(20.0);
        rec.replace(10.0, 40.0);
        assert_eq!(rec.posts, 2);
        assert!((rec.mean_engagement - 30.0).abs() < 1e-9);
    }

    #[test]
    fn replace_single_sample() {
        let mut rec = PerformanceRecord::default();
        rec.fold(5.0);
        rec.replace(5.0, 9.0);
        assert_eq!(rec.posts, 1);
        assert!((rec.mean_engagement - 9.0).abs() < 1e-9);
        assert_eq!(rec.variance(), 0.0);
    }

    #[test]
    fn neutral_prior_reads_as_mean() {
        let rec = PerformanceRecord::neutral(1.5);
        assert_eq!(rec.posts, 0);
        assert!((rec.mean_engagement - 1.5).abs() < 1e-9);
    }

    #[test]
    fn key_encoding_is_stable() {
        let key = PerformanceKey::new("carbon-x", HookKind::PerformanceWin, 9);
        assert_eq!(key.encode(), "carbon-x/performance-win/09");
    }
}
