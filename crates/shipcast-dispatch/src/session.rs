use crate::error::DispatchError;
use shipcast_core::Platform;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Browser-automation primitives. The dispatch engine is the sole
/// consumer. Implemented by ProcessSession (real driver subprocess) and
/// MockSession (tests).
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
    /// Verify an authenticated profile exists for `platform` and bind to
    /// it. Fails with `SessionUnavailable` if none. Never attempts a
    /// credential login.
    async fn acquire(&mut self, platform: Platform) -> Result<(), DispatchError>;
    async fn navigate(&mut self, url: &str) -> Result<(), DispatchError>;
    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DispatchError>;
    async fn click(&mut self, selector: &str) -> Result<(), DispatchError>;
    /// Text content of the first element matching `selector`.
    async fn read_dom(&mut self, selector: &str) -> Result<String, DispatchError>;
}

#[derive(Default)]
struct MockInner {
    calls: Mutex<Vec<String>>,
    session_available: Mutex<bool>,
    click_failures: Mutex<HashMap<String, Vec<DispatchError>>>,
    dom: Mutex<HashMap<String, String>>,
}

/// Scripted session for tests. Clones share state, so a copy can stay
/// outside the engine for inspection while the engine drives the other.
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<MockInner>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        let inner = MockInner::default();
        *inner.session_available.lock().unwrap() = true;
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Simulate a profile with no valid login.
    pub fn without_session() -> Self {
        let mock = Self::new();
        *mock.inner.session_available.lock().unwrap() = false;
        mock
    }

    /// Queue errors for the next clicks on `selector`; once drained,
    /// clicks succeed.
    pub fn fail_clicks(&self, selector: &str, errors: Vec<DispatchError>) {
        self.inner
            .click_failures
            .lock()
            .unwrap()
            .insert(selector.to_string(), errors);
    }

    pub fn set_dom(&self, selector: &str, text: &str) {
        self.inner
            .dom
            .lock()
            .unwrap()
            .insert(selector.to_string(), text.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.inner.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl BrowserSession for MockSession {
    async fn acquire(&mut self, platform: Platform) -> Result<(), DispatchError> {
        self.record(format!("acquire:{platform}"));
        if *self.inner.session_available.lock().unwrap() {
            Ok(())
        } else {
            Err(DispatchError::SessionUnavailable(platform))
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<(), DispatchError> {
        self.record(format!("navigate:{url}"));
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DispatchError> {
        self.record(format!("type:{selector}:{text}"));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DispatchError> {
        self.record(format!("click:{selector}"));
        let mut failures = self.inner.click_failures.lock().unwrap();
        if let Some(queue) = failures.get_mut(selector) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(())
    }

    async fn read_dom(&mut self, selector: &str) -> Result<String, DispatchError> {
        self.record(format!("read:{selector}"));
        self.inner
            .dom
            .lock()
            .unwrap()
            .get(selector)
            .cloned()
            .ok_or_else(|| DispatchError::ElementNotFound(selector.to_string()))
    }
}
