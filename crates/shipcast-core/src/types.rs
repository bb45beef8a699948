use serde::{Deserialize, Serialize};

/// Template identifier, as registered in config (e.g. "carbon-x").
pub type TemplateId = String;

/// Semantic classification of a commit, inferred from its message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SemanticTag {
    Feature,
    Fix,
    Perf,
    Refactor,
    Docs,
    Test,
    Chore,
}

/// One commit as supplied by the analysis collaborator. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    pub message: String,
    pub author: String,
    /// RFC3339 commit timestamp.
    pub ts: String,
    pub files: Vec<String>,
    pub added: u64,
    pub removed: u64,
    #[serde(default)]
    pub tags: Vec<SemanticTag>,
}

impl CommitRecord {
    pub fn line_delta(&self) -> u64 {
        self.added + self.removed
    }

    pub fn has_tag(&self, tag: SemanticTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// Narrative angle used to frame a post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    FeatureHighlight,
    PerformanceWin,
    BugPurge,
    RefactorStory,
    Milestone,
    SteadyProgress,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::FeatureHighlight => "feature-highlight",
            HookKind::PerformanceWin => "performance-win",
            HookKind::BugPurge => "bug-purge",
            HookKind::RefactorStory => "refactor-story",
            HookKind::Milestone => "milestone",
            HookKind::SteadyProgress => "steady-progress",
        }
    }

    /// All kinds, in rule-evaluation order.
    pub fn all() -> &'static [HookKind] {
        &[
            HookKind::FeatureHighlight,
            HookKind::PerformanceWin,
            HookKind::BugPurge,
            HookKind::RefactorStory,
            HookKind::Milestone,
            HookKind::SteadyProgress,
        ]
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate narrative angle with its supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub kind: HookKind,
    /// Human-readable evidence line (e.g. "3 new features shipped").
    pub evidence: String,
    /// Confidence weight used for ranking.
    pub weight: f64,
    /// Timestamp of the most recent supporting commit, for tie-breaks.
    pub supporting_ts: String,
}

/// Scored marketing impact of a commit set. Recomputed per run, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAssessment {
    /// Bounded 0–100.
    pub score: f64,
    /// Ranked best-first.
    pub hooks: Vec<Hook>,
}

impl ImpactAssessment {
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            hooks: Vec::new(),
        }
    }

    /// "Nothing to post". The caller should end the run without error.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn top_hook(&self) -> Option<&Hook> {
        self.hooks.first()
    }
}

/// Supported social platforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitter,
    Linkedin,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engagement counts captured from a platform at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementSnapshot {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub views: u64,
    /// RFC3339 capture time.
    pub taken_at: String,
}

impl EngagementSnapshot {
    /// Weighted total: replies are worth more than reposts, reposts more than likes.
    pub fn total(&self) -> f64 {
        (self.likes + 2 * self.reposts + 3 * self.replies) as f64
    }

    /// Engagement as a percentage of views. Zero views → 0.0.
    pub fn rate(&self) -> f64 {
        if self.views == 0 {
            return 0.0;
        }
        self.total() / self.views as f64 * 100.0
    }
}
