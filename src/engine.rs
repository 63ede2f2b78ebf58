//! Memory engine
//!
//! Ties the core together for one conversation store:
//! host notification -> reactor -> summarization pass -> allocation ->
//! rendering -> prompt surface. Passes and refreshes are serialized by a
//! single async lock, so no two generation calls for a chat are ever in
//! flight and memory state is never written by two operations at once.

use crate::chat::ConversationStore;
use crate::commands::MemoryCommand;
use crate::config::{MemorySettings, LONG_MEMORY_MACRO, SHORT_MEMORY_MACRO};
use crate::debounce::Debouncer;
use crate::memory::{
    ExclusionFilter, InclusionAllocator, MemoryCompositor, MemoryWindow, SummaryOutcome, Summarizer,
    Tier, TokenBudget,
};
use crate::reactor::{react, ChatEvent, HostState, ReactorAction};
use crate::services::{Generator, InjectionSlot, PromptSurface, TokenCounter};
use crate::{MemoirError, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Injection id for the short-term window
pub const SHORT_INJECTION_ID: &str = "memoir_short";

/// Injection id for the long-term window
pub const LONG_INJECTION_ID: &str = "memoir_long";

/// Counts from one summarization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub summarized: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub ineligible: usize,
    /// Updates dropped because the log changed underneath the pass
    pub discarded: usize,
}

impl PassReport {
    fn record(&mut self, outcome: SummaryOutcome) {
        match outcome {
            SummaryOutcome::Summarized => self.summarized += 1,
            SummaryOutcome::CacheHit => self.cache_hits += 1,
            SummaryOutcome::Failed => self.failed += 1,
            SummaryOutcome::Ineligible => self.ineligible += 1,
        }
    }
}

struct EngineInner {
    store: Arc<dyn ConversationStore>,
    counter: Arc<dyn TokenCounter>,
    generator: Arc<dyn Generator>,
    surface: Arc<dyn PromptSurface>,
    settings: RwLock<MemorySettings>,
    window: RwLock<MemoryWindow>,
    pass_lock: Mutex<()>,
}

impl EngineInner {
    async fn settings(&self) -> MemorySettings {
        self.settings.read().await.clone()
    }

    /// Recompute allocation and rendering. Caller holds `pass_lock`.
    async fn refresh_locked(&self, settings: &MemorySettings) -> MemoryWindow {
        let Some(mut snapshot) = self.store.snapshot().await else {
            debug!("No active chat, clearing memory");
            let window = MemoryCompositor::new(&[]).compose(settings);
            self.publish(settings, window.clone()).await;
            return window;
        };

        info!("Updating message inclusion flags...");
        let counter = self.counter.as_ref();
        let filter = ExclusionFilter::new(settings, counter);
        let allocator = InclusionAllocator::new(&filter, counter);
        let budget = TokenBudget::new(counter.context_size(), settings);
        let allocation = allocator.allocate(&snapshot.messages, budget);

        for message in snapshot.messages.iter_mut() {
            let tier = allocation.tier(message.index);
            if message.memory.inclusion != tier {
                message.memory.inclusion = tier;
                self.store.store_memory(&snapshot.chat_id, message).await;
            }
        }

        let window = MemoryCompositor::new(&snapshot.messages).compose(settings);
        debug!(
            "Memory refreshed: short={} ({} tokens, limit {}), long={} ({} tokens, limit {})",
            allocation.count(Tier::Short),
            allocation.short_tokens,
            budget.short_limit,
            allocation.count(Tier::Long),
            allocation.long_tokens,
            budget.long_limit
        );
        self.publish(settings, window.clone()).await;
        window
    }

    async fn publish(&self, settings: &MemorySettings, window: MemoryWindow) {
        self.surface.set_injection(
            LONG_INJECTION_ID,
            &window.long_injection,
            InjectionSlot::from(&settings.long),
        );
        self.surface.set_injection(
            SHORT_INJECTION_ID,
            &window.short_injection,
            InjectionSlot::from(&settings.short),
        );
        self.surface.show_memory(&window);
        *self.window.write().await = window;
    }

    async fn refresh(&self) -> MemoryWindow {
        let _guard = self.pass_lock.lock().await;
        let settings = self.settings().await;
        self.refresh_locked(&settings).await
    }
}

/// Memory engine for one conversation store.
///
/// Must be created inside a tokio runtime (the refresh debouncer spawns a task).
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
    debouncer: Debouncer,
}

impl MemoryEngine {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        counter: Arc<dyn TokenCounter>,
        generator: Arc<dyn Generator>,
        surface: Arc<dyn PromptSurface>,
        settings: MemorySettings,
    ) -> Self {
        let quiet = settings.refresh_debounce();
        let inner = Arc::new(EngineInner {
            store,
            counter,
            generator,
            surface,
            settings: RwLock::new(settings),
            window: RwLock::new(MemoryWindow::default()),
            pass_lock: Mutex::new(()),
        });

        let debounced = inner.clone();
        let debouncer = Debouncer::spawn(quiet, move || {
            let inner = debounced.clone();
            async move {
                inner.refresh().await;
            }
        });

        Self { inner, debouncer }
    }

    /// Copy of the current settings
    pub async fn settings(&self) -> MemorySettings {
        self.inner.settings().await
    }

    /// Replace the settings and schedule a refresh
    pub async fn update_settings(&self, settings: MemorySettings) -> Result<()> {
        settings.validate()?;
        *self.inner.settings.write().await = settings;
        debug!("Settings updated");
        self.schedule_refresh();
        Ok(())
    }

    /// Token ceilings under the current settings
    pub async fn budget(&self) -> TokenBudget {
        let settings = self.settings().await;
        TokenBudget::new(self.inner.counter.context_size(), &settings)
    }

    /// Most recently rendered memory
    pub async fn window(&self) -> MemoryWindow {
        self.inner.window.read().await.clone()
    }

    /// Resolve a memory macro to the current tier text
    pub async fn resolve_macro(&self, name: &str) -> Option<String> {
        let window = self.inner.window.read().await;
        match name {
            SHORT_MEMORY_MACRO => Some(window.short_memory.clone()),
            LONG_MEMORY_MACRO => Some(window.long_memory.clone()),
            _ => None,
        }
    }

    /// Recompute allocation and rendering now
    pub async fn refresh(&self) -> MemoryWindow {
        self.inner.refresh().await
    }

    /// Request a refresh; rapid requests collapse into one
    pub fn schedule_refresh(&self) {
        self.debouncer.trigger();
    }

    /// Run any scheduled refresh immediately
    pub async fn flush(&self) {
        self.debouncer.flush().await;
    }

    /// Summarize every message in ascending order, then refresh.
    ///
    /// Per-message failures are recorded and do not stop the pass.
    pub async fn summarize_chat(&self, replace: bool) -> Result<PassReport> {
        let _guard = self.inner.pass_lock.lock().await;
        let settings = self.inner.settings().await;
        let snapshot = self
            .inner
            .store
            .snapshot()
            .await
            .ok_or(MemoirError::NoActiveChat)?;

        info!("Summarizing chat {} ({} messages)...", snapshot.chat_id, snapshot.len());
        if settings.block_input {
            self.inner.surface.set_input_blocked(true);
        }

        let summarizer = Summarizer::new(
            &settings,
            self.inner.counter.as_ref(),
            self.inner.generator.as_ref(),
        );
        let mut report = PassReport::default();
        let chat_id = snapshot.chat_id.clone();

        for mut message in snapshot.messages {
            if self.inner.store.active_chat_id().await.as_deref() != Some(chat_id.as_str()) {
                warn!("Chat {} is no longer active, abandoning summarization pass", chat_id);
                break;
            }

            let outcome = summarizer.ensure_summarized(&mut message, replace).await;
            report.record(outcome);
            if matches!(outcome, SummaryOutcome::Summarized | SummaryOutcome::Failed)
                && !self.inner.store.store_memory(&chat_id, &message).await
            {
                report.discarded += 1;
            }
        }

        if settings.block_input {
            self.inner.surface.set_input_blocked(false);
        }
        info!(
            "Chat summarized: {} new, {} cached, {} failed",
            report.summarized, report.cache_hits, report.failed
        );

        self.inner.refresh_locked(&settings).await;
        Ok(report)
    }

    /// Mark a message (default: the last one) as remembered, then refresh
    pub async fn remember_message(&self, index: Option<usize>) -> Result<usize> {
        let _guard = self.inner.pass_lock.lock().await;
        let settings = self.inner.settings().await;
        let snapshot = self
            .inner
            .store
            .snapshot()
            .await
            .ok_or(MemoirError::NoActiveChat)?;

        let len = snapshot.len();
        let index = index.unwrap_or(len.saturating_sub(1));
        let mut message = snapshot
            .messages
            .get(index)
            .cloned()
            .ok_or(MemoirError::InvalidIndex { index, len })?;

        message.memory.remembered = true;
        if !self.inner.store.store_memory(&snapshot.chat_id, &message).await {
            return Err(MemoirError::InvalidIndex { index, len });
        }
        info!("Set message {} to be remembered in long-term memory", index);

        self.inner.refresh_locked(&settings).await;
        Ok(index)
    }

    /// React to a host notification
    pub async fn handle_event(&self, event: ChatEvent, host: HostState) -> Result<ReactorAction> {
        let settings = self.settings().await;
        let action = react(&event, &settings, host);
        debug!("Chat event {} -> {:?}", event, action);

        match action {
            ReactorAction::Ignore => {}
            ReactorAction::Refresh if event == ChatEvent::ChatChanged => {
                // Pending refreshes belong to the previous chat
                self.debouncer.cancel();
                self.refresh().await;
            }
            ReactorAction::Refresh => self.schedule_refresh(),
            ReactorAction::Summarize { replace } => {
                self.summarize_chat(replace).await?;
            }
        }
        Ok(action)
    }

    /// JSON dump of the active chat including memory state
    pub async fn log_chat(&self) -> Result<String> {
        let snapshot = self
            .inner
            .store
            .snapshot()
            .await
            .ok_or(MemoirError::NoActiveChat)?;
        let dump = serde_json::to_string_pretty(&snapshot)?;
        info!("CHAT: {}", dump);
        Ok(dump)
    }

    /// Run a slash command, returning text for the user
    pub async fn execute(&self, command: MemoryCommand) -> Result<String> {
        match command {
            MemoryCommand::Remember { index } => {
                let index = self.remember_message(index).await?;
                Ok(format!("Message {} will be remembered in long-term memory", index))
            }
            MemoryCommand::Summarize { replace } => {
                let report = self.summarize_chat(replace).await?;
                if report.failed > 0 {
                    error!("{} messages failed to summarize", report.failed);
                }
                Ok(format!(
                    "Summarized {} messages ({} cached, {} failed)",
                    report.summarized, report.cache_hits, report.failed
                ))
            }
            MemoryCommand::Refresh => Ok(self.refresh().await.display()),
            MemoryCommand::LogChat => self.log_chat().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatFile, InMemoryChat, SenderKind, StoredMessage};
    use crate::memory::test_support::{ScriptedGenerator, WordCounter};
    use crate::memory::GENERATION_FAILED;
    use crate::services::RecordingSurface;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    const LONG_TEXT: &str = "the rain kept falling over the harbor while the ships waited for dawn";

    fn story(id: &str) -> ChatFile {
        ChatFile {
            chat_id: id.to_string(),
            messages: vec![
                StoredMessage::new("Alice", SenderKind::Character, format!("first {}", LONG_TEXT)),
                StoredMessage::new("You", SenderKind::User, format!("user {}", LONG_TEXT)),
                StoredMessage::new("Alice", SenderKind::Character, format!("second {}", LONG_TEXT)),
                StoredMessage::new("Alice", SenderKind::Character, "ok"),
            ],
        }
    }

    struct Harness {
        engine: MemoryEngine,
        store: Arc<InMemoryChat>,
        surface: Arc<RecordingSurface>,
    }

    fn harness(generator: Arc<dyn Generator>, settings: MemorySettings) -> Harness {
        let store = Arc::new(InMemoryChat::with_chat(story("c1")));
        let surface = Arc::new(RecordingSurface::new());
        let engine = MemoryEngine::new(
            store.clone(),
            Arc::new(WordCounter),
            generator,
            surface.clone(),
            settings,
        );
        Harness {
            engine,
            store,
            surface,
        }
    }

    #[tokio::test]
    async fn test_pass_summarizes_eligible_and_renders() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator.clone(), MemorySettings::default());

        let report = h.engine.summarize_chat(false).await.unwrap();
        assert_eq!(report.summarized, 2);
        assert_eq!(report.ineligible, 2);
        assert_eq!(generator.calls(), 2);

        let window = h.engine.window().await;
        assert_eq!(window.short_memory, "* It rained.\n* It rained.");
        assert_eq!(
            h.surface.injection(SHORT_INJECTION_ID).unwrap().text,
            window.short_injection
        );
        assert!(h.surface.injection(LONG_INJECTION_ID).is_some());

        let snapshot = h.store.snapshot().await.unwrap();
        assert_eq!(snapshot.messages[0].memory.inclusion, Tier::Short);
        assert_eq!(snapshot.messages[1].memory.inclusion, Tier::None);
        assert_eq!(snapshot.messages[2].memory.inclusion, Tier::Short);
    }

    #[tokio::test]
    async fn test_repeated_passes_hit_cache() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator.clone(), MemorySettings::default());

        h.engine.summarize_chat(false).await.unwrap();
        let report = h.engine.summarize_chat(false).await.unwrap();
        assert_eq!(report.cache_hits, 2);
        assert_eq!(generator.calls(), 2);

        let report = h.engine.summarize_chat(true).await.unwrap();
        assert_eq!(report.summarized, 2);
        assert_eq!(generator.calls(), 4);
    }

    #[tokio::test]
    async fn test_edit_resummarizes_only_that_message() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator.clone(), MemorySettings::default());
        h.engine.summarize_chat(false).await.unwrap();

        h.store.edit(2, format!("edited {}", LONG_TEXT)).await.unwrap();
        let action = h
            .engine
            .handle_event(ChatEvent::MessageEdited, HostState::default())
            .await
            .unwrap();

        assert_eq!(action, ReactorAction::Summarize { replace: false });
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_pass() {
        let generator = Arc::new(ScriptedGenerator::sequence(&["", "The second one."]));
        let h = harness(generator.clone(), MemorySettings::default());

        let report = h.engine.summarize_chat(false).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.summarized, 1);

        let snapshot = h.store.snapshot().await.unwrap();
        let failed = &snapshot.messages[0].memory;
        assert_eq!(failed.last_error.as_deref(), Some(GENERATION_FAILED));
        assert_eq!(failed.inclusion, Tier::None);
        assert_eq!(failed.status_labels(), vec!["Error: generation failed"]);
        assert_eq!(h.engine.window().await.short_memory, "* The second one.");
    }

    #[tokio::test]
    async fn test_remember_bypasses_exclusion() {
        let generator = Arc::new(ScriptedGenerator::always("Noted."));
        let h = harness(generator.clone(), MemorySettings::default());

        // The trailing "ok" is too short to summarize on its own
        let index = h.engine.remember_message(None).await.unwrap();
        assert_eq!(index, 3);
        h.engine.summarize_chat(false).await.unwrap();

        let snapshot = h.store.snapshot().await.unwrap();
        assert!(snapshot.messages[3].memory.remembered);
        assert_eq!(snapshot.messages[3].memory.summary.as_deref(), Some("Noted."));
        assert_eq!(snapshot.messages[3].memory.inclusion, Tier::Short);

        assert!(matches!(
            h.engine.remember_message(Some(10)).await,
            Err(MemoirError::InvalidIndex { index: 10, len: 4 })
        ));
    }

    #[tokio::test]
    async fn test_remembered_message_goes_long_after_short_overflow() {
        let mut settings = MemorySettings::default();
        // WordCounter context is 1000: short limit 2 tokens, long limit 100
        settings.short.context_fraction = 0.0025;
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator, settings);

        h.engine.remember_message(Some(0)).await.unwrap();
        h.engine.summarize_chat(false).await.unwrap();

        let window = h.engine.window().await;
        assert_eq!(window.short_memory, "* It rained.");
        assert_eq!(window.long_memory, "* It rained.");
        assert_eq!(
            h.engine.resolve_macro("memoir_long_memory").await.as_deref(),
            Some("* It rained.")
        );
        assert_eq!(h.engine.resolve_macro("other").await, None);
    }

    #[tokio::test]
    async fn test_guards() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator.clone(), MemorySettings::default());

        let streaming = HostState {
            streaming: true,
            chat_selected: true,
        };
        let action = h.engine.handle_event(ChatEvent::NewMessage, streaming).await.unwrap();
        assert_eq!(action, ReactorAction::Ignore);
        assert_eq!(generator.calls(), 0);
        assert_eq!(h.surface.injection_count(), 0);

        let mut settings = h.engine.settings().await;
        settings.auto_summarize = false;
        h.engine.update_settings(settings).await.unwrap();
        let action = h
            .engine
            .handle_event(ChatEvent::NewMessage, HostState::default())
            .await
            .unwrap();
        assert_eq!(action, ReactorAction::Refresh);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_chat_changed_refreshes_immediately() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator, MemorySettings::default());
        h.engine.summarize_chat(false).await.unwrap();

        h.store.switch_chat(Some(story("c2"))).await;
        h.engine
            .handle_event(ChatEvent::ChatChanged, HostState::default())
            .await
            .unwrap();

        // The new chat has no summaries yet
        assert_eq!(h.engine.window().await.short_memory, "");
    }

    #[tokio::test]
    async fn test_debounced_refresh_on_delete() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator, MemorySettings::default());
        h.engine.summarize_chat(false).await.unwrap();

        h.store.delete(0).await.unwrap();
        h.engine
            .handle_event(ChatEvent::MessageDeleted, HostState::default())
            .await
            .unwrap();
        assert_eq!(h.engine.window().await.short_memory, "* It rained.\n* It rained.");

        h.engine.flush().await;
        assert_eq!(h.engine.window().await.short_memory, "* It rained.");
    }

    #[tokio::test]
    async fn test_refresh_after_cancel_is_not_lost() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator, MemorySettings::default());
        let host = HostState::default();
        h.engine.summarize_chat(false).await.unwrap();

        h.engine.handle_event(ChatEvent::MessageSwiped, host).await.unwrap();
        h.engine.handle_event(ChatEvent::ChatChanged, host).await.unwrap();
        h.store.delete(0).await.unwrap();
        h.engine.handle_event(ChatEvent::MessageDeleted, host).await.unwrap();

        h.engine.flush().await;
        assert_eq!(h.engine.window().await.short_memory, "* It rained.");
    }

    /// Records whether host input was blocked at each generation call
    struct BlockWatcher {
        surface: Arc<RecordingSurface>,
        seen: std::sync::Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Generator for BlockWatcher {
        async fn generate_raw(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            self.seen.lock().unwrap().push(self.surface.input_blocked());
            Ok("It rained.".to_string())
        }

        async fn generate_quiet(&self, prompt: &str, max_tokens: usize) -> Result<String> {
            self.generate_raw(prompt, max_tokens).await
        }
    }

    #[tokio::test]
    async fn test_block_input_during_pass() {
        let store = Arc::new(InMemoryChat::with_chat(story("c1")));
        let surface = Arc::new(RecordingSurface::new());
        let generator = Arc::new(BlockWatcher {
            surface: surface.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let settings = MemorySettings {
            block_input: true,
            ..MemorySettings::default()
        };
        let engine = MemoryEngine::new(
            store,
            Arc::new(WordCounter),
            generator.clone(),
            surface.clone(),
            settings,
        );

        engine.summarize_chat(false).await.unwrap();
        assert_eq!(*generator.seen.lock().unwrap(), vec![true, true]);
        assert!(!surface.input_blocked());
    }

    #[tokio::test]
    async fn test_input_left_alone_without_block_setting() {
        let store = Arc::new(InMemoryChat::with_chat(story("c1")));
        let surface = Arc::new(RecordingSurface::new());
        let generator = Arc::new(BlockWatcher {
            surface: surface.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let engine = MemoryEngine::new(
            store,
            Arc::new(WordCounter),
            generator.clone(),
            surface.clone(),
            MemorySettings::default(),
        );

        engine.summarize_chat(false).await.unwrap();
        assert_eq!(*generator.seen.lock().unwrap(), vec![false, false]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_settings() {
        let generator = Arc::new(ScriptedGenerator::always("x"));
        let h = harness(generator, MemorySettings::default());
        let mut settings = MemorySettings::default();
        settings.short.context_fraction = 2.0;
        assert!(h.engine.update_settings(settings).await.is_err());
    }

    /// Switches the active chat during its first generation call
    struct SwitchingGenerator {
        store: Arc<InMemoryChat>,
    }

    #[async_trait]
    impl Generator for SwitchingGenerator {
        async fn generate_raw(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            self.store.switch_chat(Some(story("c2"))).await;
            Ok("Stale summary.".to_string())
        }

        async fn generate_quiet(&self, prompt: &str, max_tokens: usize) -> Result<String> {
            self.generate_raw(prompt, max_tokens).await
        }
    }

    #[tokio::test]
    async fn test_chat_switch_mid_pass_discards_updates() {
        let store = Arc::new(InMemoryChat::with_chat(story("c1")));
        let generator = Arc::new(SwitchingGenerator {
            store: store.clone(),
        });
        let engine = MemoryEngine::new(
            store.clone(),
            Arc::new(WordCounter),
            generator,
            Arc::new(RecordingSurface::new()),
            MemorySettings::default(),
        );

        let report = engine.summarize_chat(false).await.unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(report.summarized, 1);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.chat_id, "c2");
        assert!(snapshot.messages.iter().all(|m| m.memory.summary.is_none()));
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let generator = Arc::new(ScriptedGenerator::always("It rained."));
        let h = harness(generator, MemorySettings::default());

        let out = h
            .engine
            .execute(MemoryCommand::Summarize { replace: false })
            .await
            .unwrap();
        assert_eq!(out, "Summarized 2 messages (0 cached, 0 failed)");

        let out = h.engine.execute(MemoryCommand::Remember { index: Some(1) }).await.unwrap();
        assert!(out.contains("Message 1"));

        let dump = h.engine.execute(MemoryCommand::LogChat).await.unwrap();
        assert!(dump.contains("\"remembered\": true"));

        let display = h.engine.execute(MemoryCommand::Refresh).await.unwrap();
        assert!(display.contains("[Following is a list of recent events]"));
    }
}
