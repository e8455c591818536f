use crate::core::predicate::Predicate;
use crate::errors::Result;
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Thin capability surface over a remote page.
///
/// Everything above this trait (resilient actions, waits, the session
/// automaton) is driver-agnostic; the Chrome implementation lives in
/// `browser::chrome` and the scripted test double in `testing`.
#[async_trait]
pub trait InteractionDriver: Send + Sync {
    /// Addressable browsing-context handle. Cloning the handle does not
    /// duplicate the context; exactly one handle is "active" at the session
    /// level at any time.
    type Tab: Clone + Send + Sync + 'static;

    /// Open a fresh browsing context.
    async fn open_tab(&self) -> Result<Self::Tab>;

    /// Navigate the context to a URL and wait for the initial load.
    async fn navigate(&self, tab: &Self::Tab, url: &str) -> Result<()>;

    /// Poll until an element matching the selector is visible, or the
    /// timeout elapses. Absence is a normal `false`, never an error.
    async fn wait_for_visible(&self, tab: &Self::Tab, selector: &str, timeout_ms: u64)
        -> Result<bool>;

    /// Click the first element matching the selector. Returns `false` when
    /// nothing matched.
    async fn click(&self, tab: &Self::Tab, selector: &str) -> Result<bool>;

    /// Type into the first element matching the selector, with a delay
    /// between keystrokes so per-key input listeners fire.
    async fn type_text(
        &self,
        tab: &Self::Tab,
        selector: &str,
        text: &str,
        inter_key_delay_ms: u64,
    ) -> Result<bool>;

    /// Select-all-and-delete the current content of the field via mouse
    /// click plus in-page selection. Works without prior focus.
    async fn clear_field(&self, tab: &Self::Tab, selector: &str) -> Result<bool>;

    /// Press a named key (e.g. "Enter") with the given element focused.
    async fn press_key(&self, tab: &Self::Tab, selector: &str, key: &str) -> Result<bool>;

    /// Evaluate a typed predicate against live document state.
    async fn evaluate(&self, tab: &Self::Tab, predicate: &Predicate) -> Result<bool>;

    /// Number of elements currently matching the selector.
    async fn count_matches(&self, tab: &Self::Tab, selector: &str) -> Result<u64>;

    /// Visible text of the first element matching the selector, if any.
    async fn visible_text(&self, tab: &Self::Tab, selector: &str) -> Result<Option<String>>;

    /// Click the first candidate under `selector` whose visible label
    /// matches the pattern. Returns `false` when no label matched.
    async fn click_by_label(&self, tab: &Self::Tab, selector: &str, pattern: &Regex)
        -> Result<bool>;

    /// Register a one-shot listener for "new browsing context created".
    /// Must be called BEFORE the triggering action; see
    /// [`TabSubscription::resolve`] for the bounded wait.
    async fn subscribe_new_tab(&self, current: &Self::Tab) -> Result<TabSubscription<Self::Tab>>;

    /// PNG screenshot of the context. Diagnostic use only.
    async fn screenshot(&self, tab: &Self::Tab) -> Result<Vec<u8>>;
}

/// Single-slot, one-shot future for a spawned browsing context.
///
/// Written at most once (by the driver's watcher), read at most once (by
/// `resolve`), with the timeout as the alternate writer. The watcher task is
/// torn down on resolution so a stale listener can never fire on a later,
/// unrelated context.
pub struct TabSubscription<T> {
    rx: oneshot::Receiver<T>,
    watcher: Option<JoinHandle<()>>,
}

impl<T> TabSubscription<T> {
    /// Create the slot; the returned sender is handed to whatever watches
    /// for the new context.
    pub fn slot() -> (oneshot::Sender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx, watcher: None })
    }

    /// Attach the watcher task so it is aborted once the slot resolves.
    pub fn with_watcher(mut self, handle: JoinHandle<()>) -> Self {
        self.watcher = Some(handle);
        self
    }

    /// First of {context event, timeout} wins. `None` means nothing spawned
    /// within the bound: a reported failure, never an indefinite suspension.
    pub async fn resolve(mut self, timeout: Duration) -> Option<T> {
        let outcome = tokio::select! {
            received = &mut self.rx => received.ok(),
            _ = tokio::time::sleep(timeout) => None,
        };
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slot_resolves_when_written_before_timeout() {
        let (tx, sub) = TabSubscription::<u32>::slot();
        tx.send(7).unwrap();
        assert_eq!(sub.resolve(Duration::from_secs(5)).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_times_out_when_never_written() {
        let (_tx, sub) = TabSubscription::<u32>::slot();
        assert_eq!(sub.resolve(Duration::from_millis(200)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_write_loses_the_race() {
        let (tx, sub) = TabSubscription::<u32>::slot();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let _ = tx.send(9);
        });
        assert_eq!(sub.resolve(Duration::from_secs(1)).await, None);
    }
}
