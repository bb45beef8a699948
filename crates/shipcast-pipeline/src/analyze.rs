use anyhow::{bail, Context, Result};
use std::path::Path;

use shipcast_core::{CommitRecord, SemanticTag};

/// Supplies the ordered (oldest-first) commit set for a target and ref.
/// Failure to resolve the target is fatal for that run only.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    async fn commits(&self, target: &str, git_ref: Option<&str>) -> Result<Vec<CommitRecord>>;
}

/// Fixture analyzer for tests and dry runs.
pub struct StaticAnalyzer {
    pub commits: Vec<CommitRecord>,
}

#[async_trait::async_trait]
impl Analyzer for StaticAnalyzer {
    async fn commits(&self, _target: &str, _git_ref: Option<&str>) -> Result<Vec<CommitRecord>> {
        Ok(self.commits.clone())
    }
}

/// Thin collaborator over the git CLI. Remote URLs are shallow-cloned to a
/// temp dir; local paths are read in place.
pub struct GitCliAnalyzer {
    pub max_commits: usize,
}

impl Default for GitCliAnalyzer {
    fn default() -> Self {
        Self { max_commits: 10 }
    }
}

#[async_trait::async_trait]
impl Analyzer for GitCliAnalyzer {
    async fn commits(&self, target: &str, git_ref: Option<&str>) -> Result<Vec<CommitRecord>> {
        let is_remote = target.starts_with("http://")
            || target.starts_with("https://")
            || target.starts_with("git@");

        let tmp;
        let repo_dir: &Path = if is_remote {
            tmp = tempfile::tempdir().context("creating clone dir")?;
            clone_shallow(target, tmp.path()).await?;
            tmp.path()
        } else {
            Path::new(target)
        };

        let output = git_log(repo_dir, git_ref, self.max_commits).await?;
        let mut commits = parse_git_log(&output);
        // git log is newest-first; the pipeline wants chronological order.
        commits.reverse();
        Ok(commits)
    }
}

async fn clone_shallow(url: &str, dest: &Path) -> Result<()> {
    let status = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("50")
        .arg(url)
        .arg(dest)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .context("spawning git clone")?;
    if !status.success() {
        bail!("git clone failed for {url}");
    }
    Ok(())
}

async fn git_log(repo_dir: &Path, git_ref: Option<&str>, max_commits: usize) -> Result<String> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("-C")
        .arg(repo_dir)
        .arg("log")
        .arg(format!("--max-count={max_commits}"))
        .arg("--numstat")
        // Record separator \x1e, field separator \x1f.
        .arg("--format=%x1e%H%x1f%an%x1f%aI%x1f%s");
    if let Some(r) = git_ref {
        cmd.arg(r);
    }
    let output = cmd.output().await.context("spawning git log")?;
    if !output.status.success() {
        bail!(
            "git log failed in {}: {}",
            repo_dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `git log --numstat` output with \x1e/\x1f separators.
pub fn parse_git_log(output: &str) -> Vec<CommitRecord> {
    let mut commits = Vec::new();
    for chunk in output.split('\x1e').skip(1) {
        let mut lines = chunk.lines();
        let Some(header) = lines.next() else { continue };
        let fields: Vec<&str> = header.split('\x1f').collect();
        if fields.len() != 4 {
            continue;
        }

        let mut files = Vec::new();
        let (mut added, mut removed) = (0u64, 0u64);
        for line in lines {
            let mut cols = line.split_whitespace();
            let (Some(a), Some(r), Some(path)) = (cols.next(), cols.next(), cols.next()) else {
                continue;
            };
            // Binary files report "-" for both counts.
            added += a.parse::<u64>().unwrap_or(0);
            removed += r.parse::<u64>().unwrap_or(0);
            files.push(path.to_string());
        }

        let message = fields[3].to_string();
        commits.push(CommitRecord {
            hash: fields[0].to_string(),
            author: fields[1].to_string(),
            ts: fields[2].to_string(),
            tags: infer_tags(&message),
            message,
            files,
            added,
            removed,
        });
    }
    commits
}

/// Keyword table mapping commit messages to semantic tags. A message can
/// carry several tags; an unclassifiable one carries none.
pub fn infer_tags(message: &str) -> Vec<SemanticTag> {
    const RULES: &[(SemanticTag, &[&str])] = &[
        (SemanticTag::Fix, &["fix", "bug", "patch"]),
        (SemanticTag::Feature, &["feat", "add ", "new "]),
        (SemanticTag::Refactor, &["refactor", "clean", "improve"]),
        (SemanticTag::Perf, &["perf", "optimize", "speed"]),
        (SemanticTag::Docs, &["doc", "readme"]),
        (SemanticTag::Test, &["test", "spec"]),
        (SemanticTag::Chore, &["chore", "bump", "ci:"]),
    ];

    let lower = message.to_lowercase();
    RULES
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(tag, _)| *tag)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_tags_matches_keyword_table() {
        assert_eq!(infer_tags("fix: crash on startup"), vec![SemanticTag::Fix]);
        assert_eq!(
            infer_tags("feat: add new parser"),
            vec![SemanticTag::Feature]
        );
        assert_eq!(
            infer_tags("perf: optimize hot loop"),
            vec![SemanticTag::Perf]
        );
        assert!(infer_tags("whatever else").is_empty());
    }

    #[test]
    fn infer_tags_can_stack() {
        let tags = infer_tags("fix: patch perf regression in tests");
        assert!(tags.contains(&SemanticTag::Fix));
        assert!(tags.contains(&SemanticTag::Perf));
        assert!(tags.contains(&SemanticTag::Test));
    }

    #[test]
    fn parse_git_log_reads_numstat() {
        let output = "\x1eabc123\x1fAlice\x1f2026-01-02T10:00:00+00:00\x1ffeat: add widget\n\
                      10\t2\tsrc/widget.rs\n\
                      3\t0\tsrc/lib.rs\n\
                      \x1edef456\x1fBob\x1f2026-01-01T09:00:00+00:00\x1fchore: bump deps\n\
                      1\t1\tCargo.toml\n";
        let commits = parse_git_log(output);
        assert_eq!(commits.len(), 2);

        let first = &commits[0];
        assert_eq!(first.hash, "abc123");
        assert_eq!(first.author, "Alice");
        assert_eq!(first.message, "feat: add widget");
        assert_eq!(first.files, vec!["src/widget.rs", "src/lib.rs"]);
        assert_eq!(first.added, 13);
        assert_eq!(first.removed, 2);
        assert_eq!(first.tags, vec![SemanticTag::Feature]);
    }

    #[test]
    fn parse_git_log_tolerates_binary_files() {
        let output = "\x1eabc\x1fA\x1f2026-01-01T00:00:00+00:00\x1fadd logo\n\
                      -\t-\tassets/logo.png\n";
        let commits = parse_git_log(output);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].added, 0);
        assert_eq!(commits[0].files, vec!["assets/logo.png"]);
    }

    #[test]
    fn parse_git_log_empty_output() {
        assert!(parse_git_log("").is_empty());
    }

    #[tokio::test]
    async fn static_analyzer_returns_fixture() {
        let analyzer = StaticAnalyzer { commits: vec![] };
        assert!(analyzer.commits("x", None).await.unwrap().is_empty());
    }
}
