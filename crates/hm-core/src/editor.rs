//! Editor mutation protocol
//!
//! The editor keeps its own working copy of the record, loaded once when it
//! opens. Every mutation lands in the working copy immediately and (re)starts a
//! debounce window; when the window elapses the latest state is written in a
//! single store call. The editor never listens for other writers: its next
//! save simply replaces whatever is stored.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Config, Rule, RuleId, STORAGE_KEY};
use crate::filter::{self, FilterError};
use crate::store::{ConfigStore, StoreError};

/// Default debounce window for saves.
pub const DEFAULT_SAVE_DELAY_MS: u64 = 150;

// =============================================================================
// Time
// =============================================================================

/// Millisecond wall clock, injected so hosts without `SystemTime` can supply one.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Trailing-edge debounce: each `schedule` pushes the deadline out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    delay_ms: u64,
    deadline: Option<u64>,
}

impl Debouncer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            deadline: None,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn schedule(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms.saturating_add(self.delay_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.deadline.map_or(false, |deadline| now_ms >= deadline)
    }

    /// Milliseconds left until the pending deadline, `None` when idle.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline.map(|deadline| deadline.saturating_sub(now_ms))
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_SAVE_DELAY_MS)
    }
}

// =============================================================================
// Editor
// =============================================================================

/// Partial update of a rule. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePatch {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub value: Option<String>,
}

/// What a host save timer should do when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePoll {
    /// The window has elapsed: write this record.
    Write(Config),
    /// Not due yet: fire again after this many milliseconds.
    Wait(u64),
    /// Nothing pending.
    Idle,
}

pub struct Editor<C: Clock = SystemClock> {
    config: Config,
    debounce: Debouncer,
    clock: C,
}

impl<C: Clock> Editor<C> {
    pub fn new(config: Config, clock: C) -> Self {
        Self {
            config,
            debounce: Debouncer::default(),
            clock,
        }
    }

    pub fn with_save_delay(mut self, delay_ms: u64) -> Self {
        self.debounce = Debouncer::new(delay_ms);
        self
    }

    /// Open an editor session on the stored record. A failed read opens on the
    /// built-in default.
    pub async fn open<S: ConfigStore>(store: &S, clock: C) -> Self {
        let stored = match store.get(STORAGE_KEY).await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Failed to read configuration, editing defaults: {}", e);
                None
            }
        };
        Self::new(Config::from_stored(stored.as_ref()), clock)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn touch(&mut self) {
        self.debounce.schedule(self.clock.now_ms());
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
        self.touch();
    }

    /// Store the filter text as typed. The returned result feeds the inline
    /// hint; an invalid pattern is still saved and fails open at enforcement.
    pub fn set_url_regex(&mut self, pattern: impl Into<String>) -> Result<(), FilterError> {
        self.config.url_regex = pattern.into();
        self.touch();
        self.filter_status()
    }

    /// Validation of the current filter text.
    pub fn filter_status(&self) -> Result<(), FilterError> {
        filter::validate(&self.config.url_regex)
    }

    /// Append an enabled rule with empty name and value. It has no effect until
    /// it gets a name.
    pub fn add_rule(&mut self) -> RuleId {
        let now = self.clock.now_ms();
        let mut id = RuleId::generate(now);
        while self.config.rule(&id).is_some() {
            id = RuleId::generate(now);
        }
        self.config.rules.push(Rule::new(id.clone()));
        self.touch();
        id
    }

    pub fn update_rule(&mut self, id: &RuleId, patch: RulePatch) -> bool {
        let rule = match self.config.rule_mut(id) {
            Some(rule) => rule,
            None => return false,
        };
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(value) = patch.value {
            rule.value = value;
        }
        self.touch();
        true
    }

    pub fn set_rule_enabled(&mut self, id: &RuleId, enabled: bool) -> bool {
        self.update_rule(
            id,
            RulePatch {
                enabled: Some(enabled),
                ..RulePatch::default()
            },
        )
    }

    pub fn delete_rule(&mut self, id: &RuleId) -> bool {
        let before = self.config.rules.len();
        self.config.rules.retain(|rule| &rule.id != id);
        if self.config.rules.len() == before {
            return false;
        }
        self.touch();
        true
    }

    pub fn save_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    pub fn save_due(&self) -> bool {
        self.debounce.is_due(self.clock.now_ms())
    }

    /// Milliseconds until the pending save is due, `None` when nothing is pending.
    pub fn ms_until_save(&self) -> Option<u64> {
        self.debounce.remaining_ms(self.clock.now_ms())
    }

    /// Take the record to persist if the debounce window has elapsed, clearing
    /// the pending save. Lets a host drop its borrow of the editor before
    /// awaiting the write.
    pub fn take_due_save(&mut self) -> Option<Config> {
        if !self.save_due() {
            return None;
        }
        self.debounce.cancel();
        Some(self.config.clone())
    }

    /// Timer entry point. A timer that fires before the deadline, because the
    /// deadline moved or the host clock lags the timer, is told to wait for
    /// the remainder instead of dropping the save.
    pub fn poll_save(&mut self) -> SavePoll {
        if let Some(record) = self.take_due_save() {
            return SavePoll::Write(record);
        }
        match self.ms_until_save() {
            Some(remaining) => SavePoll::Wait(remaining.max(1)),
            None => SavePoll::Idle,
        }
    }

    /// Take the record to persist if any save is pending, ignoring the window.
    pub fn take_pending_save(&mut self) -> Option<Config> {
        if !self.save_pending() {
            return None;
        }
        self.debounce.cancel();
        Some(self.config.clone())
    }

    /// Replace the working copy with the built-in default, drop any pending
    /// save and return the record to write immediately.
    pub fn reset_record(&mut self) -> Config {
        self.config = Config::default();
        self.debounce.cancel();
        self.config.clone()
    }

    /// Write the working copy if the debounce window has elapsed. Returns
    /// whether a write was attempted.
    pub async fn flush<S: ConfigStore>(&mut self, store: &S) -> Result<bool, StoreError> {
        match self.take_due_save() {
            Some(record) => write(store, &record).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Write the working copy now if any save is pending.
    pub async fn flush_now<S: ConfigStore>(&mut self, store: &S) -> Result<bool, StoreError> {
        match self.take_pending_save() {
            Some(record) => write(store, &record).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Reset to the built-in default and write it at once.
    pub async fn reset<S: ConfigStore>(&mut self, store: &S) -> Result<(), StoreError> {
        let record = self.reset_record();
        write(store, &record).await
    }
}

async fn write<S: ConfigStore>(store: &S, record: &Config) -> Result<(), StoreError> {
    store.set(STORAGE_KEY, record.to_value()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStore;
    use crate::store::StorageChange;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct TestClock(Rc<Cell<u64>>);

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    fn stored(store: &MemoryStore) -> Config {
        Config::from_stored(store.snapshot(STORAGE_KEY).as_ref())
    }

    #[test]
    fn test_debouncer_window() {
        let mut debounce = Debouncer::new(150);
        assert!(!debounce.is_pending());
        assert_eq!(debounce.remaining_ms(0), None);

        debounce.schedule(1_000);
        assert!(!debounce.is_due(1_149));
        assert!(debounce.is_due(1_150));
        assert_eq!(debounce.remaining_ms(1_100), Some(50));

        debounce.schedule(1_100);
        assert!(!debounce.is_due(1_150));
        assert!(debounce.is_due(1_250));

        debounce.cancel();
        assert!(!debounce.is_due(10_000));
    }

    #[tokio::test]
    async fn test_open_loads_record() {
        let store = MemoryStore::with_value(STORAGE_KEY, json!({ "enabled": false, "urlRegex": "x" }));
        let editor = Editor::open(&store, TestClock::default()).await;
        assert!(!editor.config().enabled);
        assert_eq!(editor.config().url_regex, "x");
        assert!(!editor.save_pending());
    }

    #[tokio::test]
    async fn test_mutations_collapse_into_one_write() {
        let store = MemoryStore::default();
        let writes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&writes);
        store.subscribe(Box::new(move |_: &StorageChange| counter.set(counter.get() + 1)));

        let clock = TestClock::default();
        let mut editor = Editor::new(Config::default(), clock.clone());

        let id = editor.add_rule();
        for (i, partial) in ["X", "X-", "X-T", "X-Test"].iter().enumerate() {
            clock.advance(40);
            editor.update_rule(
                &id,
                RulePatch {
                    name: Some(partial.to_string()),
                    ..RulePatch::default()
                },
            );
            assert!(!editor.flush(&store).await.unwrap(), "flushed early at step {}", i);
        }

        clock.advance(149);
        assert!(!editor.flush(&store).await.unwrap());
        clock.advance(1);
        assert!(editor.flush(&store).await.unwrap());

        assert_eq!(writes.get(), 1);
        assert_eq!(stored(&store).rules[0].name, "X-Test");
        assert!(!editor.save_pending());
    }

    #[test]
    fn test_early_timer_waits_for_remainder() {
        let clock = TestClock(Rc::new(Cell::new(1_000)));
        let mut editor = Editor::new(Config::default(), clock.clone());
        assert_eq!(editor.poll_save(), SavePoll::Idle);

        editor.set_enabled(false);
        let armed = editor.ms_until_save().unwrap();
        assert_eq!(armed, DEFAULT_SAVE_DELAY_MS);

        clock.advance(armed - 1);
        assert_eq!(editor.poll_save(), SavePoll::Wait(1));
        assert!(editor.save_pending());

        clock.advance(1);
        match editor.poll_save() {
            SavePoll::Write(record) => assert!(!record.enabled),
            other => panic!("expected a write, got {:?}", other),
        }
        assert_eq!(editor.poll_save(), SavePoll::Idle);
    }

    #[test]
    fn test_moved_deadline_waits_again() {
        let clock = TestClock::default();
        let mut editor = Editor::new(Config::default(), clock.clone());
        editor.set_enabled(false);

        clock.advance(100);
        editor.set_url_regex("x").unwrap();
        clock.advance(50);
        assert_eq!(editor.poll_save(), SavePoll::Wait(100));
    }

    #[test]
    fn test_mutations_update_working_copy_immediately() {
        let clock = TestClock::default();
        let mut editor = Editor::new(Config::default(), clock);

        editor.set_enabled(false);
        let id = editor.add_rule();
        assert!(editor.set_rule_enabled(&id, false));
        assert!(editor.update_rule(
            &id,
            RulePatch {
                value: Some(String::new()),
                ..RulePatch::default()
            }
        ));

        assert!(!editor.config().enabled);
        assert!(!editor.config().rules[0].enabled);
        assert_eq!(editor.ms_until_save(), Some(DEFAULT_SAVE_DELAY_MS));
    }

    #[test]
    fn test_unknown_rule_id_is_ignored() {
        let mut editor = Editor::new(Config::default(), TestClock::default());
        let missing = RuleId::from("missing");
        assert!(!editor.delete_rule(&missing));
        assert!(!editor.set_rule_enabled(&missing, true));
        assert!(!editor.save_pending());
    }

    #[tokio::test]
    async fn test_delete_rule() {
        let clock = TestClock::default();
        let store = MemoryStore::default();
        let mut editor = Editor::new(Config::default(), clock.clone());
        let keep = editor.add_rule();
        let dropped = editor.add_rule();
        assert!(editor.delete_rule(&dropped));

        clock.advance(DEFAULT_SAVE_DELAY_MS);
        assert!(editor.flush(&store).await.unwrap());
        let config = stored(&store);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].id, keep);
    }

    #[test]
    fn test_filter_hint() {
        let mut editor = Editor::new(Config::default(), TestClock::default());
        assert!(editor.set_url_regex("^https://").is_ok());

        let err = editor.set_url_regex("[invalid").unwrap_err();
        assert!(err.to_string().starts_with("Invalid regex"));
        assert_eq!(editor.config().url_regex, "[invalid");
        assert!(editor.save_pending());
    }

    #[tokio::test]
    async fn test_reset_writes_immediately() {
        let clock = TestClock::default();
        let store = MemoryStore::with_value(STORAGE_KEY, json!({ "enabled": false }));
        let mut editor = Editor::open(&store, clock.clone()).await;
        editor.add_rule();
        assert!(editor.save_pending());

        editor.reset(&store).await.unwrap();
        assert_eq!(stored(&store), Config::default());
        assert_eq!(editor.config(), &Config::default());
        assert!(!editor.save_pending());

        clock.advance(1_000);
        assert!(!editor.flush(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_now_ignores_window() {
        let store = MemoryStore::default();
        let mut editor = Editor::new(Config::default(), TestClock::default());
        assert!(!editor.flush_now(&store).await.unwrap());

        editor.set_enabled(false);
        assert!(editor.flush_now(&store).await.unwrap());
        assert!(!stored(&store).enabled);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_working_copy() {
        let clock = TestClock::default();
        let store = MemoryStore::default();
        store.set_fail_writes(true);

        let mut editor = Editor::new(Config::default(), clock.clone());
        editor.set_enabled(false);
        clock.advance(DEFAULT_SAVE_DELAY_MS);

        assert!(editor.flush(&store).await.is_err());
        assert!(!editor.config().enabled);
        assert!(store.snapshot(STORAGE_KEY).is_none());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let clock = TestClock::default();
        let store = MemoryStore::default();
        let mut first = Editor::new(Config::default(), clock.clone());
        let mut second = Editor::new(Config::default(), clock.clone());

        first.set_url_regex("first").unwrap();
        second.set_url_regex("second").unwrap();
        clock.advance(DEFAULT_SAVE_DELAY_MS);

        first.flush(&store).await.unwrap();
        second.flush(&store).await.unwrap();
        assert_eq!(stored(&store).url_regex, "second");
    }
}
