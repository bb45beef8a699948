use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use shipcast_core::{EngagementSnapshot, HookKind, Platform, TemplateId};

use crate::paths::{lock_file, write_atomic, LockGuard};
use crate::records::{
    is_valid_transition, PerformanceKey, PerformanceRecord, PostRecord, PostStatus, StoreError,
};

/// Durable snapshot format: one JSON document holding both the per-slot
/// aggregates and the post history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    performance: BTreeMap<String, PerformanceRecord>,
    #[serde(default)]
    posts: BTreeMap<String, PostRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
}

/// Process-wide learning state. All PerformanceRecord and PostRecord
/// access goes through this type; every mutation is written through to
/// disk atomically before it becomes visible to readers.
pub struct LearningStore {
    file: PathBuf,
    neutral_prior: f64,
    inner: RwLock<Snapshot>,
    _lock: LockGuard,
}

impl LearningStore {
    /// Open (or create) the store under `dir`. Holds an exclusive file
    /// lock for the lifetime of the store, so two processes never write
    /// the same snapshot.
    pub fn open(dir: &Path, neutral_prior: f64) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(anyhow::Error::from)?;
        let lock = lock_file(&dir.join("store.lock"))?;
        let file = dir.join("learning.json");

        let snapshot = if file.exists() {
            let content = std::fs::read_to_string(&file).map_err(anyhow::Error::from)?;
            serde_json::from_str(&content)?
        } else {
            Snapshot {
                version: 1,
                ..Default::default()
            }
        };

        Ok(Self {
            file,
            neutral_prior,
            inner: RwLock::new(snapshot),
            _lock: lock,
        })
    }

    /// Run a mutation against a copy of the snapshot, persist it, then
    /// swap it in. Readers see either the old or the new state, never a
    /// half-applied one; a failed write leaves memory untouched.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut next = self.inner.read().expect("store lock poisoned").clone();
        let out = f(&mut next)?;
        next.last_updated = Some(now_rfc3339());
        let json = serde_json::to_string_pretty(&next)?;
        write_atomic(&self.file, json.as_bytes())?;
        *self.inner.write().expect("store lock poisoned") = next;
        Ok(out)
    }

    // ── Post lifecycle ──

    /// Create a new `pending` PostRecord and return it.
    pub fn create_post(
        &self,
        platform: Platform,
        template: &TemplateId,
        hook: HookKind,
        bucket: u8,
    ) -> Result<PostRecord, StoreError> {
        let record = PostRecord {
            id: ulid::Ulid::new().to_string(),
            platform,
            template: template.clone(),
            hook,
            bucket,
            created_at: now_rfc3339(),
            status: PostStatus::Pending,
            dispatched_at: None,
            post_ref: None,
            engagement: None,
        };
        let cloned = record.clone();
        self.mutate(move |snap| {
            snap.posts.insert(record.id.clone(), record);
            Ok(())
        })?;
        Ok(cloned)
    }

    /// Transition a post along the lifecycle table. Illegal moves fail
    /// with `InvalidTransition` and change nothing.
    pub fn update_status(&self, post_id: &str, to: PostStatus) -> Result<(), StoreError> {
        self.mutate(|snap| {
            let post = snap
                .posts
                .get_mut(post_id)
                .ok_or_else(|| StoreError::NotFound(post_id.to_string()))?;
            if !is_valid_transition(post.status, to) {
                return Err(StoreError::InvalidTransition {
                    post_id: post_id.to_string(),
                    from: post.status,
                    to,
                });
            }
            post.status = to;
            Ok(())
        })
    }

    /// Attach the platform post reference after a successful submit.
    pub fn mark_dispatched(&self, post_id: &str, post_ref: &str) -> Result<(), StoreError> {
        self.mutate(|snap| {
            let post = snap
                .posts
                .get_mut(post_id)
                .ok_or_else(|| StoreError::NotFound(post_id.to_string()))?;
            post.post_ref = Some(post_ref.to_string());
            post.dispatched_at = Some(now_rfc3339());
            Ok(())
        })
    }

    pub fn get_post(&self, post_id: &str) -> Option<PostRecord> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .posts
            .get(post_id)
            .cloned()
    }

    pub fn posts_with_status(&self, status: PostStatus) -> Vec<PostRecord> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .posts
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect()
    }

    /// Restart recovery: no post may stay `pending` or `confirmed` across
    /// a process boundary. Pending drafts are skipped, confirmed-but-
    /// unresolved dispatches are failed. Returns the swept records.
    pub fn sweep_stale_pending(&self) -> Result<Vec<PostRecord>, StoreError> {
        self.mutate(|snap| {
            let mut swept = Vec::new();
            for post in snap.posts.values_mut() {
                let to = match post.status {
                    PostStatus::Pending => PostStatus::Skipped,
                    PostStatus::Confirmed => PostStatus::Failed,
                    _ => continue,
                };
                post.status = to;
                swept.push(post.clone());
            }
            Ok(swept)
        })
    }

    // ── Learning ──

    /// Fold an engagement snapshot into the post and its performance slot.
    /// Unknown post ids fail with `NotFound`; a snapshot never creates a
    /// post. Re-recording replaces the previous snapshot's contribution
    /// without bumping the slot's count.
    pub fn record_outcome(
        &self,
        post_id: &str,
        snapshot: EngagementSnapshot,
    ) -> Result<(), StoreError> {
        self.mutate(|snap| {
            let post = snap
                .posts
                .get_mut(post_id)
                .ok_or_else(|| StoreError::NotFound(post_id.to_string()))?;

            let key =
                PerformanceKey::new(post.template.clone(), post.hook, post.bucket).encode();
            let new_total = snapshot.total();
            let old_total = post.engagement.as_ref().map(|e| e.total());
            post.engagement = Some(snapshot);

            let slot = snap.performance.entry(key).or_default();
            match old_total {
                Some(old) => slot.replace(old, new_total),
                None => slot.fold(new_total),
            }
            Ok(())
        })
    }

    /// Aggregate for a slot, or the neutral prior if untried. Never fails.
    pub fn lookup_performance(
        &self,
        template: &TemplateId,
        hook: HookKind,
        bucket: u8,
    ) -> PerformanceRecord {
        let key = PerformanceKey::new(template.clone(), hook, bucket).encode();
        self.inner
            .read()
            .expect("store lock poisoned")
            .performance
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PerformanceRecord::neutral(self.neutral_prior))
    }

    pub fn neutral_prior(&self) -> f64 {
        self.neutral_prior
    }

    /// Count of performance slots with at least one recorded outcome.
    pub fn recorded_slots(&self) -> usize {
        self.inner
            .read()
            .expect("store lock poisoned")
            .performance
            .len()
    }

    /// Summary for `shipcast insights`.
    pub fn insights(&self) -> Insights {
        let snap = self.inner.read().expect("store lock poisoned");
        let total_posts = snap.posts.len();
        let posted = snap
            .posts
            .values()
            .filter(|p| p.status == PostStatus::Posted)
            .count();
        let failed = snap
            .posts
            .values()
            .filter(|p| p.status == PostStatus::Failed)
            .count();
        let total_engagement: f64 = snap
            .posts
            .values()
            .filter_map(|p| p.engagement.as_ref())
            .map(|e| e.total())
            .sum();
        let best_slot = snap
            .performance
            .iter()
            .filter(|(_, r)| r.posts > 0)
            .max_by(|a, b| {
                a.1.mean_engagement
                    .partial_cmp(&b.1.mean_engagement)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(key, rec)| SlotSummary {
                slot: key.clone(),
                posts: rec.posts,
                mean_engagement: rec.mean_engagement,
            });
        Insights {
            total_posts,
            posted,
            failed,
            total_engagement,
            best_slot,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Insights {
    pub total_posts: usize,
    pub posted: usize,
    pub failed: usize,
    pub total_engagement: f64,
    pub best_slot: Option<SlotSummary>,
}

#[derive(Debug, Serialize)]
pub struct SlotSummary {
    pub slot: String,
    pub posts: u64,
    pub mean_engagement: f64,
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
