use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use shipcast_core::{Hook, HookKind, TemplateId};

/// Data handed to the render collaborator.
#[derive(Debug, Clone)]
pub struct RenderData {
    pub repo_name: String,
    pub hook: Hook,
    pub score: f64,
    pub commit_count: usize,
    pub head_hash: String,
    pub highlights: Vec<String>,
}

/// Render collaborator: template + data + deterministic entropy seed →
/// artifact on disk. Repeated runs over the same commit produce identical
/// artifacts.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        template: &TemplateId,
        data: &RenderData,
        entropy_seed: f64,
    ) -> Result<PathBuf>;
}

/// Minimal deterministic HTML renderer. Visual variation comes only from
/// the entropy seed (accent hue), so identical inputs give identical bytes.
pub struct HtmlRenderer {
    pub out_dir: PathBuf,
}

impl HtmlRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl Renderer for HtmlRenderer {
    async fn render(
        &self,
        template: &TemplateId,
        data: &RenderData,
        entropy_seed: f64,
    ) -> Result<PathBuf> {
        let hue = (entropy_seed * 360.0) as u16 % 360;
        let short = &data.head_hash[..data.head_hash.len().min(8)];
        let highlights = data
            .highlights
            .iter()
            .map(|h| format!("      <li>{h}</li>\n"))
            .collect::<String>();
        let html = format!(
            "<!doctype html>\n\
             <html lang=\"en\">\n\
             <head>\n\
             <meta charset=\"utf-8\">\n\
             <title>{repo} — {hook}</title>\n\
             <style>\n\
             :root {{ --accent: hsl({hue}, 70%, 55%); }}\n\
             body {{ font-family: 'JetBrains Mono', monospace; background: #0f1117; color: #e6e6e6; }}\n\
             .card {{ border: 2px solid var(--accent); border-radius: 12px; padding: 2rem; }}\n\
             .score {{ color: var(--accent); font-size: 3rem; }}\n\
             </style>\n\
             </head>\n\
             <body data-template=\"{template}\">\n\
             <div class=\"card\">\n\
               <h1>{repo}</h1>\n\
               <p class=\"hook\">{evidence}</p>\n\
               <p class=\"score\">{score:.0}</p>\n\
               <p class=\"meta\">{count} commits · {short}</p>\n\
               <ul>\n{highlights}      </ul>\n\
             </div>\n\
             </body>\n\
             </html>\n",
            repo = data.repo_name,
            hook = data.hook.kind,
            evidence = data.hook.evidence,
            score = data.score,
            count = data.commit_count,
        );

        let path = self.out_dir.join(format!("{template}-{short}.html"));
        shipcast_store::paths::write_atomic(&path, html.as_bytes())
            .with_context(|| format!("writing artifact {}", path.display()))?;
        Ok(path)
    }
}

#[derive(Default)]
struct MockRendererInner {
    calls: Mutex<Vec<(TemplateId, HookKind, f64)>>,
    fail: Mutex<bool>,
}

/// Recording renderer for tests. Clones share state.
#[derive(Clone, Default)]
pub struct MockRenderer {
    inner: Arc<MockRendererInner>,
    out_dir: Arc<Mutex<PathBuf>>,
}

impl MockRenderer {
    pub fn new(out_dir: &Path) -> Self {
        Self {
            inner: Arc::new(MockRendererInner::default()),
            out_dir: Arc::new(Mutex::new(out_dir.to_path_buf())),
        }
    }

    pub fn fail_next(&self) {
        *self.inner.fail.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<(TemplateId, HookKind, f64)> {
        self.inner.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Renderer for MockRenderer {
    async fn render(
        &self,
        template: &TemplateId,
        data: &RenderData,
        entropy_seed: f64,
    ) -> Result<PathBuf> {
        self.inner
            .calls
            .lock()
            .unwrap()
            .push((template.clone(), data.hook.kind, entropy_seed));
        if std::mem::take(&mut *self.inner.fail.lock().unwrap()) {
            anyhow::bail!("render backend unavailable");
        }
        let path = self.out_dir.lock().unwrap().join(format!("{template}.html"));
        std::fs::write(&path, "<html></html>")?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipcast_core::seed::entropy_seed;

    fn data() -> RenderData {
        RenderData {
            repo_name: "widgetd".into(),
            hook: Hook {
                kind: HookKind::FeatureHighlight,
                evidence: "3 new features shipped".into(),
                weight: 9.0,
                supporting_ts: "2026-01-01T00:00:00Z".into(),
            },
            score: 72.0,
            commit_count: 5,
            head_hash: "abcdef1234567890".into(),
            highlights: vec!["Most active file: src/widget.rs".into()],
        }
    }

    #[tokio::test]
    async fn html_render_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = HtmlRenderer::new(dir.path());
        let seed = entropy_seed("abcdef1234567890");

        let template = "carbon-x".to_string();
        let a = renderer.render(&template, &data(), seed).await.unwrap();
        let first = std::fs::read_to_string(&a).unwrap();
        let b = renderer.render(&template, &data(), seed).await.unwrap();
        let second = std::fs::read_to_string(&b).unwrap();

        assert_eq!(a, b);
        assert_eq!(first, second);
        assert!(first.contains("3 new features shipped"));
        assert!(first.contains("data-template=\"carbon-x\""));
    }

    #[tokio::test]
    async fn different_seeds_change_the_accent() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = HtmlRenderer::new(dir.path());
        let template = "carbon-x".to_string();

        let a = renderer.render(&template, &data(), 0.1).await.unwrap();
        let first = std::fs::read_to_string(&a).unwrap();
        let b = renderer.render(&template, &data(), 0.9).await.unwrap();
        let second = std::fs::read_to_string(&b).unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn mock_renderer_records_calls() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MockRenderer::new(dir.path());
        let template = "bento-metrics".to_string();
        renderer.render(&template, &data(), 0.5).await.unwrap();

        let calls = renderer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "bento-metrics");
        assert_eq!(calls[0].1, HookKind::FeatureHighlight);
    }
}
