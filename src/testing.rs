//! Scripted in-memory driver for tests.
//!
//! Models a page as sets of visible selectors, texts, counts and candidate
//! labels, mutated by a timed schedule and by reactions to clicks and key
//! presses. Runs entirely on tokio's (pausable) clock, so timing-sensitive
//! scenarios like the two-phase OTP wait execute instantly under
//! `#[tokio::test(start_paused = true)]`.

use crate::core::driver::{InteractionDriver, TabSubscription};
use crate::core::predicate::Predicate;
use crate::errors::{AutomationError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// One scripted change to a page.
#[derive(Debug, Clone)]
pub enum Mutation {
    Show(String),
    Hide(String),
    SetText(String, String),
    SetCount(String, u64),
    SetLabels(String, Vec<String>),
    SetReady(bool),
    /// Create a new browsing context seeded with the given mutations.
    SpawnTab(Vec<Mutation>),
}

impl Mutation {
    pub fn show(selector: impl Into<String>) -> Self {
        Mutation::Show(selector.into())
    }

    pub fn hide(selector: impl Into<String>) -> Self {
        Mutation::Hide(selector.into())
    }

    pub fn set_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Mutation::SetText(selector.into(), text.into())
    }

    pub fn set_count(selector: impl Into<String>, count: u64) -> Self {
        Mutation::SetCount(selector.into(), count)
    }

    pub fn set_labels(selector: impl Into<String>, labels: Vec<&str>) -> Self {
        Mutation::SetLabels(
            selector.into(),
            labels.into_iter().map(|l| l.to_string()).collect(),
        )
    }

    pub fn spawn_tab(initial: Vec<Mutation>) -> Self {
        Mutation::SpawnTab(initial)
    }
}

#[derive(Debug, Clone, Default)]
struct PageModel {
    visible: HashSet<String>,
    texts: HashMap<String, String>,
    counts: HashMap<String, u64>,
    labels: HashMap<String, Vec<String>>,
    ready: bool,
}

impl PageModel {
    fn fresh() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    fn count_of(&self, selector: &str) -> u64 {
        self.counts.get(selector).copied().unwrap_or_else(|| {
            if self.visible.contains(selector) {
                1
            } else {
                0
            }
        })
    }
}

struct Inner {
    pages: HashMap<usize, PageModel>,
    tabs: Vec<usize>,
    next_tab: usize,
    first_tab_seeded: bool,
    seed: Vec<Mutation>,
    schedule: Vec<(Duration, Mutation)>,
    on_click: HashMap<String, VecDeque<Vec<Mutation>>>,
    on_key: HashMap<(String, String), VecDeque<Vec<Mutation>>>,
    on_label: HashMap<(String, String), VecDeque<Vec<Mutation>>>,
    fail: HashSet<String>,
    new_tab_waiters: Vec<oneshot::Sender<usize>>,
    probe_log: Vec<String>,
    click_log: Vec<String>,
    typed_log: Vec<(String, String)>,
    key_log: Vec<(String, String)>,
    cleared_log: Vec<String>,
    nav_log: Vec<String>,
}

/// Scripted [`InteractionDriver`] double. Tabs are plain ids; the first
/// opened tab receives the builder's initial page state and the timed
/// schedule applies to it.
pub struct ScriptedDriver {
    inner: Mutex<Inner>,
    start: Instant,
}

pub struct ScriptedDriverBuilder {
    seed: Vec<Mutation>,
    schedule: Vec<(Duration, Mutation)>,
    on_click: HashMap<String, VecDeque<Vec<Mutation>>>,
    on_key: HashMap<(String, String), VecDeque<Vec<Mutation>>>,
    on_label: HashMap<(String, String), VecDeque<Vec<Mutation>>>,
    fail: HashSet<String>,
}

impl ScriptedDriverBuilder {
    pub fn visible(mut self, selector: &str) -> Self {
        self.seed.push(Mutation::show(selector));
        self
    }

    pub fn text(mut self, selector: &str, text: &str) -> Self {
        self.seed.push(Mutation::set_text(selector, text));
        self
    }

    pub fn count(mut self, selector: &str, count: u64) -> Self {
        self.seed.push(Mutation::set_count(selector, count));
        self
    }

    pub fn labels(mut self, selector: &str, labels: Vec<&str>) -> Self {
        self.seed.push(Mutation::set_labels(selector, labels));
        self
    }

    pub fn seed_with(mut self, mutation: Mutation) -> Self {
        self.seed.push(mutation);
        self
    }

    /// Apply a mutation to the first tab once the given offset from driver
    /// construction has elapsed.
    pub fn at(mut self, offset: Duration, mutation: Mutation) -> Self {
        self.schedule.push((offset, mutation));
        self
    }

    /// Queue a reaction for the next click on the selector. Repeated calls
    /// queue further reactions, consumed one per click.
    pub fn on_click(mut self, selector: &str, reactions: Vec<Mutation>) -> Self {
        self.on_click
            .entry(selector.to_string())
            .or_default()
            .push_back(reactions);
        self
    }

    pub fn on_key(mut self, selector: &str, key: &str, reactions: Vec<Mutation>) -> Self {
        self.on_key
            .entry((selector.to_string(), key.to_string()))
            .or_default()
            .push_back(reactions);
        self
    }

    pub fn on_label_click(
        mut self,
        selector: &str,
        label: &str,
        reactions: Vec<Mutation>,
    ) -> Self {
        self.on_label
            .entry((selector.to_string(), label.to_string()))
            .or_default()
            .push_back(reactions);
        self
    }

    /// Make every driver operation on the selector fail with a hard error.
    pub fn fail_on(mut self, selector: &str) -> Self {
        self.fail.insert(selector.to_string());
        self
    }

    pub fn build(mut self) -> ScriptedDriver {
        self.schedule.sort_by_key(|(offset, _)| *offset);
        ScriptedDriver {
            inner: Mutex::new(Inner {
                pages: HashMap::new(),
                tabs: Vec::new(),
                next_tab: 1,
                first_tab_seeded: false,
                seed: self.seed,
                schedule: self.schedule,
                on_click: self.on_click,
                on_key: self.on_key,
                on_label: self.on_label,
                fail: self.fail,
                new_tab_waiters: Vec::new(),
                probe_log: Vec::new(),
                click_log: Vec::new(),
                typed_log: Vec::new(),
                key_log: Vec::new(),
                cleared_log: Vec::new(),
                nav_log: Vec::new(),
            }),
            start: Instant::now(),
        }
    }
}

impl ScriptedDriver {
    pub fn builder() -> ScriptedDriverBuilder {
        ScriptedDriverBuilder {
            seed: Vec::new(),
            schedule: Vec::new(),
            on_click: HashMap::new(),
            on_key: HashMap::new(),
            on_label: HashMap::new(),
            fail: HashSet::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap();
        let elapsed = self.start.elapsed();
        let due: Vec<Mutation> = {
            let split = inner
                .schedule
                .iter()
                .position(|(offset, _)| *offset > elapsed)
                .unwrap_or(inner.schedule.len());
            inner
                .schedule
                .drain(..split)
                .map(|(_, mutation)| mutation)
                .collect()
        };
        for mutation in due {
            let first = *inner.tabs.first().unwrap_or(&1);
            apply(&mut inner, first, mutation);
        }
        inner
    }

    fn check_fault(inner: &Inner, selector: &str) -> Result<()> {
        if inner.fail.contains(selector) {
            return Err(AutomationError::ChromeError(format!(
                "scripted fault on '{}'",
                selector
            )));
        }
        Ok(())
    }

    pub fn probe_log(&self) -> Vec<String> {
        self.lock().probe_log.clone()
    }

    pub fn click_log(&self) -> Vec<String> {
        self.lock().click_log.clone()
    }

    pub fn typed_log(&self) -> Vec<(String, String)> {
        self.lock().typed_log.clone()
    }

    pub fn key_log(&self) -> Vec<(String, String)> {
        self.lock().key_log.clone()
    }

    pub fn cleared_log(&self) -> Vec<String> {
        self.lock().cleared_log.clone()
    }

    pub fn nav_log(&self) -> Vec<String> {
        self.lock().nav_log.clone()
    }

    /// Ids of all contexts ever opened, in creation order. Contexts are
    /// never removed: the scripted driver has no close, which lets tests
    /// assert that abandoned tabs were left alone.
    pub fn tabs(&self) -> Vec<usize> {
        self.lock().tabs.clone()
    }

    pub fn is_visible(&self, tab: usize, selector: &str) -> bool {
        self.lock()
            .pages
            .get(&tab)
            .map(|page| page.visible.contains(selector))
            .unwrap_or(false)
    }
}

fn page_mut(inner: &mut Inner, tab: usize) -> &mut PageModel {
    inner.pages.entry(tab).or_insert_with(PageModel::fresh)
}

fn apply(inner: &mut Inner, tab: usize, mutation: Mutation) {
    match mutation {
        Mutation::Show(selector) => {
            page_mut(inner, tab).visible.insert(selector);
        }
        Mutation::Hide(selector) => {
            page_mut(inner, tab).visible.remove(&selector);
        }
        Mutation::SetText(selector, text) => {
            page_mut(inner, tab).texts.insert(selector, text);
        }
        Mutation::SetCount(selector, count) => {
            page_mut(inner, tab).counts.insert(selector, count);
        }
        Mutation::SetLabels(selector, labels) => {
            page_mut(inner, tab).labels.insert(selector, labels);
        }
        Mutation::SetReady(ready) => {
            page_mut(inner, tab).ready = ready;
        }
        Mutation::SpawnTab(initial) => {
            let id = inner.next_tab;
            inner.next_tab += 1;
            inner.pages.insert(id, PageModel::fresh());
            inner.tabs.push(id);
            for seeded in initial {
                apply(inner, id, seeded);
            }
            if let Some(tx) = inner.new_tab_waiters.pop() {
                let _ = tx.send(id);
            }
        }
    }
}

fn react(inner: &mut Inner, tab: usize, reactions: Option<Vec<Mutation>>) {
    if let Some(reactions) = reactions {
        for mutation in reactions {
            apply(inner, tab, mutation);
        }
    }
}

fn eval(page: &PageModel, predicate: &Predicate) -> Result<bool> {
    Ok(match predicate {
        Predicate::Visible { selector } => page.visible.contains(selector),
        Predicate::Absent { selector } => !page.visible.contains(selector),
        Predicate::LabelMatch { selector, pattern } => {
            let rx = case_insensitive(pattern)?;
            let text_hit = page
                .texts
                .get(selector)
                .map(|text| rx.is_match(text))
                .unwrap_or(false);
            let label_hit = page
                .labels
                .get(selector)
                .map(|labels| labels.iter().any(|label| rx.is_match(label)))
                .unwrap_or(false);
            text_hit || label_hit
        }
        Predicate::AttrMatch { .. } => false,
        Predicate::CountInRange { selector, min, max } => {
            let count = page.count_of(selector);
            count >= u64::from(*min) && max.map(|max| count <= u64::from(max)).unwrap_or(true)
        }
        Predicate::DocumentReady => page.ready,
        Predicate::AllOf(preds) => {
            for pred in preds {
                if !eval(page, pred)? {
                    return Ok(false);
                }
            }
            true
        }
        Predicate::AnyOf(preds) => {
            for pred in preds {
                if eval(page, pred)? {
                    return Ok(true);
                }
            }
            false
        }
        Predicate::Not(inner) => !eval(page, inner)?,
    })
}

fn case_insensitive(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){}", pattern)).map_err(|e| AutomationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl InteractionDriver for ScriptedDriver {
    type Tab = usize;

    async fn open_tab(&self) -> Result<Self::Tab> {
        let mut inner = self.lock();
        let id = inner.next_tab;
        inner.next_tab += 1;
        inner.pages.insert(id, PageModel::fresh());
        inner.tabs.push(id);
        if !inner.first_tab_seeded {
            inner.first_tab_seeded = true;
            let seed = std::mem::take(&mut inner.seed);
            for mutation in seed {
                apply(&mut inner, id, mutation);
            }
        }
        Ok(id)
    }

    async fn navigate(&self, tab: &Self::Tab, url: &str) -> Result<()> {
        self.lock().nav_log.push(format!("{}:{}", tab, url));
        Ok(())
    }

    async fn wait_for_visible(
        &self,
        tab: &Self::Tab,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<bool> {
        {
            let mut inner = self.lock();
            Self::check_fault(&inner, selector)?;
            inner.probe_log.push(selector.to_string());
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            {
                let inner = self.lock();
                if inner
                    .pages
                    .get(tab)
                    .map(|page| page.visible.contains(selector))
                    .unwrap_or(false)
                {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn click(&self, tab: &Self::Tab, selector: &str) -> Result<bool> {
        let mut inner = self.lock();
        Self::check_fault(&inner, selector)?;
        let present = inner
            .pages
            .get(tab)
            .map(|page| page.visible.contains(selector) || page.count_of(selector) > 0)
            .unwrap_or(false);
        if !present {
            return Ok(false);
        }
        inner.click_log.push(selector.to_string());
        let reactions = inner
            .on_click
            .get_mut(selector)
            .and_then(|queue| queue.pop_front());
        react(&mut inner, *tab, reactions);
        Ok(true)
    }

    async fn type_text(
        &self,
        tab: &Self::Tab,
        selector: &str,
        text: &str,
        inter_key_delay_ms: u64,
    ) -> Result<bool> {
        {
            let mut inner = self.lock();
            Self::check_fault(&inner, selector)?;
            if !inner
                .pages
                .get(tab)
                .map(|page| page.visible.contains(selector))
                .unwrap_or(false)
            {
                return Ok(false);
            }
            inner
                .typed_log
                .push((selector.to_string(), text.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(
            inter_key_delay_ms * text.chars().count() as u64,
        ))
        .await;
        Ok(true)
    }

    async fn clear_field(&self, tab: &Self::Tab, selector: &str) -> Result<bool> {
        let mut inner = self.lock();
        Self::check_fault(&inner, selector)?;
        if !inner
            .pages
            .get(tab)
            .map(|page| page.visible.contains(selector))
            .unwrap_or(false)
        {
            return Ok(false);
        }
        inner.cleared_log.push(selector.to_string());
        Ok(true)
    }

    async fn press_key(&self, tab: &Self::Tab, selector: &str, key: &str) -> Result<bool> {
        let mut inner = self.lock();
        Self::check_fault(&inner, selector)?;
        inner.key_log.push((selector.to_string(), key.to_string()));
        let reactions = inner
            .on_key
            .get_mut(&(selector.to_string(), key.to_string()))
            .and_then(|queue| queue.pop_front());
        react(&mut inner, *tab, reactions);
        Ok(true)
    }

    async fn evaluate(&self, tab: &Self::Tab, predicate: &Predicate) -> Result<bool> {
        let inner = self.lock();
        match inner.pages.get(tab) {
            Some(page) => eval(page, predicate),
            None => Ok(false),
        }
    }

    async fn count_matches(&self, tab: &Self::Tab, selector: &str) -> Result<u64> {
        let inner = self.lock();
        Self::check_fault(&inner, selector)?;
        Ok(inner
            .pages
            .get(tab)
            .map(|page| page.count_of(selector))
            .unwrap_or(0))
    }

    async fn visible_text(&self, tab: &Self::Tab, selector: &str) -> Result<Option<String>> {
        let inner = self.lock();
        Self::check_fault(&inner, selector)?;
        Ok(inner
            .pages
            .get(tab)
            .and_then(|page| page.texts.get(selector).cloned()))
    }

    async fn click_by_label(
        &self,
        tab: &Self::Tab,
        selector: &str,
        pattern: &Regex,
    ) -> Result<bool> {
        let mut inner = self.lock();
        Self::check_fault(&inner, selector)?;
        let matched = inner.pages.get(tab).and_then(|page| {
            page.labels
                .get(selector)
                .and_then(|labels| labels.iter().find(|label| pattern.is_match(label)).cloned())
        });
        let Some(label) = matched else {
            return Ok(false);
        };
        inner.click_log.push(format!("{}[{}]", selector, label));
        let reactions = inner
            .on_label
            .get_mut(&(selector.to_string(), label))
            .and_then(|queue| queue.pop_front());
        react(&mut inner, *tab, reactions);
        Ok(true)
    }

    async fn subscribe_new_tab(&self, _current: &Self::Tab) -> Result<TabSubscription<Self::Tab>> {
        let (tx, sub) = TabSubscription::slot();
        self.lock().new_tab_waiters.push(tx);
        Ok(sub)
    }

    async fn screenshot(&self, _tab: &Self::Tab) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// A full two-archetype site profile for tests: every logical target the
/// flows know about, with the fallback lists kept short.
pub fn profile_fixture() -> crate::core::profile::SiteProfile {
    use crate::core::profile::{
        AuthConfig, AuthKind, Credentials, CustomizeRules, FeatureFlags, SiteProfile,
        TimingBudgets,
    };

    let mut selectors: HashMap<String, Vec<String>> = HashMap::new();
    let mut set = |name: &str, list: &[&str]| {
        selectors.insert(
            name.to_string(),
            list.iter().map(|s| s.to_string()).collect(),
        );
    };
    set("login_entry", &["a.account-entry"]);
    set("identifier_input", &["input#identifier", "input[name='email']"]);
    set("auth_submit", &["button#auth-continue"]);
    set("signup_entry", &["a.create-account"]);
    set("signin_entry", &["a.use-existing"]);
    set("otp_challenge", &[".otp-dialog"]);
    set("otp_inputs", &["input.otp-digit"]);
    set("account_area", &["#account-menu"]);
    set("signin_control", &["a.sign-in"]);
    set("search_input", &["input[name='q']"]);
    set("search_submit", &["button.search-go"]);
    set("results_grid", &["#results"]);
    set("result_card", &[".result-card"]);
    set("first_result_link", &[".result-card a"]);
    set("add_to_cart", &["button.add-to-cart"]);
    set("cart_count", &[".cart-count"]);
    set("cart_added_toast", &[".added-toast"]);
    set("cart_link", &["a.cart"]);
    set("cart_view", &["#cart-page"]);
    set("customize_continue", &["button.wizard-continue"]);
    set("customize_submit", &["button.wizard-submit"]);
    set("customize_option", &["input.option:not(:checked)"]);
    set("customize_controls", &[".wizard button"]);
    set("location_entry", &["button.pick-location"]);
    set("location_input", &["input#location"]);
    set("location_suggestion", &[".suggestion:first-child"]);
    set("location_confirm", &["button.confirm-location"]);
    set("location_prompt", &[".location-modal"]);
    set("modal_dismiss", &["button.dismiss"]);
    drop(set);

    SiteProfile {
        site: "market-a".to_string(),
        base_url: "https://market-a.example".to_string(),
        selectors,
        timing: TimingBudgets::default(),
        flags: FeatureFlags::default(),
        auth: AuthConfig {
            kind: AuthKind::Identifier,
            registered_notice_pattern: "already (registered|exists|have an account)".to_string(),
        },
        credentials: Credentials {
            identifier: "buyer@example.com".to_string(),
        },
        customize: CustomizeRules::default(),
        default_location: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn schedule_applies_to_the_first_tab_when_due() {
        let driver = ScriptedDriver::builder()
            .at(Duration::from_secs(1), Mutation::show("#late"))
            .build();
        let tab = driver.open_tab().await.unwrap();

        assert!(!driver.wait_for_visible(&tab, "#late", 100).await.unwrap());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(driver.wait_for_visible(&tab, "#late", 100).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn click_reactions_are_consumed_in_order() {
        let driver = ScriptedDriver::builder()
            .visible("#add")
            .on_click("#add", vec![])
            .on_click("#add", vec![Mutation::set_text(".count", "1")])
            .build();
        let tab = driver.open_tab().await.unwrap();

        driver.click(&tab, "#add").await.unwrap();
        assert_eq!(driver.visible_text(&tab, ".count").await.unwrap(), None);

        driver.click(&tab, "#add").await.unwrap();
        assert_eq!(
            driver.visible_text(&tab, ".count").await.unwrap(),
            Some("1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_tab_resolves_a_pending_subscription() {
        let driver = ScriptedDriver::builder()
            .visible("a.product")
            .on_click(
                "a.product",
                vec![Mutation::spawn_tab(vec![Mutation::show("#detail")])],
            )
            .build();
        let tab = driver.open_tab().await.unwrap();

        let sub = driver.subscribe_new_tab(&tab).await.unwrap();
        driver.click(&tab, "a.product").await.unwrap();
        let spawned = sub.resolve(Duration::from_secs(1)).await.unwrap();

        assert_ne!(spawned, tab);
        assert!(driver.is_visible(spawned, "#detail"));
    }
}
