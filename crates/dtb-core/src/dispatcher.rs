//! Inbound event routing.
//!
//! Commands, free text and button presses arrive as transport-neutral
//! [`IncomingUpdate`] values. Stateless commands (start/help/stats) are
//! answered directly from the store; everything else becomes a flow event
//! for the conversation engine. The per-user session lock is held for the
//! whole handling of one update, so one user's events are processed in
//! strict arrival order while other users progress concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::{
    conversation::{ConversationEngine, EventOrigin, SessionRegistry},
    domain::{ChatId, UserId},
    errors::Error,
    flow::FlowEvent,
    formatting,
    messaging::{
        port::MessagingPort,
        types::{CallbackQuery, Command, IncomingUpdate},
    },
    store::{DiaryStore, UserProfile},
    Result,
};

pub struct Dispatcher {
    store: Arc<DiaryStore>,
    messenger: Arc<dyn MessagingPort>,
    engine: ConversationEngine,
    sessions: SessionRegistry,
}

impl Dispatcher {
    pub fn new(
        store: Arc<DiaryStore>,
        messenger: Arc<dyn MessagingPort>,
        list_limit: u32,
    ) -> Self {
        Self {
            engine: ConversationEngine::new(store.clone(), messenger.clone(), list_limit),
            store,
            messenger,
            sessions: SessionRegistry::default(),
        }
    }

    pub async fn handle_update(&self, update: IncomingUpdate) -> Result<()> {
        let user_id = update.user_id();
        let mut session = self.sessions.lock(user_id).await;

        match update {
            IncomingUpdate::Command(cmd) => {
                session.chat = Some(cmd.chat_id);
                match cmd.name.as_str() {
                    "start" => self.handle_start(&cmd).await?,
                    "help" => {
                        self.messenger
                            .send_html(cmd.chat_id, &formatting::help_text())
                            .await?;
                    }
                    "stats" => self.handle_stats(cmd.chat_id, user_id).await?,
                    "new" => {
                        self.engine
                            .apply(
                                cmd.chat_id,
                                user_id,
                                &mut session,
                                FlowEvent::StartCompose,
                                EventOrigin::Message,
                            )
                            .await?;
                    }
                    "list" => {
                        self.engine
                            .apply(
                                cmd.chat_id,
                                user_id,
                                &mut session,
                                FlowEvent::StartBrowse,
                                EventOrigin::Message,
                            )
                            .await?;
                    }
                    "done" => {
                        self.engine
                            .apply(
                                cmd.chat_id,
                                user_id,
                                &mut session,
                                FlowEvent::Done,
                                EventOrigin::Message,
                            )
                            .await?;
                    }
                    "cancel" => {
                        self.engine
                            .apply(
                                cmd.chat_id,
                                user_id,
                                &mut session,
                                FlowEvent::Cancel,
                                EventOrigin::Message,
                            )
                            .await?;
                    }
                    _ => {
                        self.messenger
                            .send_html(cmd.chat_id, &formatting::idle_hint_text())
                            .await?;
                    }
                }
            }

            IncomingUpdate::Text(text) => {
                session.chat = Some(text.chat_id);
                // The table turns this into a buffered chunk while composing
                // and into a "use /help" hint otherwise.
                self.engine
                    .apply(
                        text.chat_id,
                        user_id,
                        &mut session,
                        FlowEvent::Chunk(text.text),
                        EventOrigin::Message,
                    )
                    .await?;
            }

            IncomingUpdate::Callback(query) => {
                session.chat = Some(query.chat_id);
                match Self::callback_event(&query) {
                    Ok(event) => {
                        self.engine
                            .apply(
                                query.chat_id,
                                user_id,
                                &mut session,
                                event,
                                EventOrigin::Callback {
                                    callback_id: query.callback_id,
                                    message: query.message,
                                },
                            )
                            .await?;
                    }
                    Err(err) => {
                        // Unknown tag, most likely from a long-dead keyboard.
                        tracing::debug!(user_id = user_id.0, error = %err, "unroutable callback");
                        self.messenger
                            .answer_callback_query(
                                &query.callback_id,
                                Some(&formatting::stale_control_notice()),
                            )
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    fn callback_event(query: &CallbackQuery) -> Result<FlowEvent> {
        match query.data.as_str() {
            formatting::CB_DONE => Ok(FlowEvent::Done),
            formatting::CB_BACK => Ok(FlowEvent::Back),
            formatting::CB_CLOSE => Ok(FlowEvent::Close),
            data => formatting::parse_show_tag(data)
                .map(FlowEvent::Select)
                .ok_or_else(|| Error::StateMismatch(format!("unknown callback tag: {data}"))),
        }
    }

    async fn handle_start(&self, cmd: &Command) -> Result<()> {
        let profile = UserProfile {
            user_id: cmd.user_id,
            username: cmd.username.clone(),
            first_name: cmd.first_name.clone(),
            last_name: cmd.last_name.clone(),
        };
        match self.store.upsert_user(&profile).await {
            Ok(()) => {
                self.messenger
                    .send_html(cmd.chat_id, &formatting::welcome_text())
                    .await?;
            }
            Err(err) => {
                tracing::warn!(user_id = cmd.user_id.0, error = %err, "registering user failed");
                self.messenger
                    .send_html(cmd.chat_id, &formatting::storage_failure_text())
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_stats(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        match self.store.stats(user_id).await {
            Ok(stats) => {
                self.messenger
                    .send_html(chat_id, &formatting::stats_text(&stats, Utc::now()))
                    .await?;
            }
            Err(Error::NotFound(_)) => {
                self.messenger
                    .send_html(chat_id, &formatting::unregistered_text())
                    .await?;
            }
            Err(err) => {
                tracing::warn!(user_id = user_id.0, error = %err, "stats query failed");
                self.messenger
                    .send_html(chat_id, &formatting::storage_failure_text())
                    .await?;
            }
        }
        Ok(())
    }

    /// Apply an external idle-timeout policy: abandoned in-progress sessions
    /// are cancelled exactly as if the user had sent the cancel signal.
    /// The engine re-checks idleness once the session lock is held.
    pub async fn expire_idle(&self, max_idle: Duration) {
        for (user_id, session) in self.sessions.stale_sessions(max_idle).await {
            let mut guard = session.lock().await;
            let chat_id = guard.chat.unwrap_or(ChatId(user_id.0));
            if let Err(err) = self.engine.expire(chat_id, user_id, &mut guard, max_idle).await {
                tracing::warn!(user_id = user_id.0, error = %err, "session expiry failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, MessageRef};
    use crate::messaging::types::TextMessage;
    use crate::testutil::FakeMessenger;

    const CHAT: ChatId = ChatId(77);
    const USER: UserId = UserId(77);

    async fn dispatcher() -> (Dispatcher, Arc<DiaryStore>, Arc<FakeMessenger>) {
        let store = Arc::new(DiaryStore::open_in_memory().await.unwrap());
        let messenger = Arc::new(FakeMessenger::default());
        let dispatcher = Dispatcher::new(store.clone(), messenger.clone(), 10);
        (dispatcher, store, messenger)
    }

    fn command(name: &str) -> IncomingUpdate {
        IncomingUpdate::Command(Command {
            chat_id: CHAT,
            user_id: USER,
            username: Some("ann".to_string()),
            first_name: Some("Ann".to_string()),
            last_name: None,
            name: name.to_string(),
            args: String::new(),
        })
    }

    fn text(body: &str) -> IncomingUpdate {
        IncomingUpdate::Text(TextMessage {
            chat_id: CHAT,
            user_id: USER,
            text: body.to_string(),
        })
    }

    fn callback(data: &str) -> IncomingUpdate {
        IncomingUpdate::Callback(CallbackQuery {
            chat_id: CHAT,
            user_id: USER,
            callback_id: format!("cb-{data}"),
            data: data.to_string(),
            message: Some(MessageRef {
                chat_id: CHAT,
                message_id: MessageId(1),
            }),
        })
    }

    async fn run(d: &Dispatcher, updates: Vec<IncomingUpdate>) {
        for u in updates {
            d.handle_update(u).await.unwrap();
        }
    }

    #[tokio::test]
    async fn compose_scenario_saves_and_reports() {
        let (d, store, messenger) = dispatcher().await;

        run(
            &d,
            vec![command("new"), text("Hello"), text("World"), callback("done")],
        )
        .await;

        let entries = store.list_entries(USER, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Hello\n\nWorld");
        assert!(messenger
            .all_texts()
            .iter()
            .any(|s| s.contains("Characters: 12, words: 2")));
    }

    #[tokio::test]
    async fn list_with_no_entries_reports_and_stays_idle() {
        let (d, _, messenger) = dispatcher().await;

        run(&d, vec![command("list")]).await;
        assert!(messenger.sent_html().iter().any(|s| s.contains("No entries")));

        // Still idle: free text gets the default hint, not buffered.
        run(&d, vec![text("am I composing?")]).await;
        assert!(messenger.sent_html().iter().any(|s| s.contains("Use /help")));
    }

    #[tokio::test]
    async fn unknown_show_id_keeps_browsing() {
        let (d, store, messenger) = dispatcher().await;
        let id = store.add_entry(USER, "kept").await.unwrap();

        run(&d, vec![command("list"), callback("show_424242")]).await;
        assert!(messenger
            .sent_html()
            .iter()
            .any(|s| s.contains("could not be found")));

        // Browsing still works: the real entry opens.
        run(&d, vec![callback(&format!("show_{id}"))]).await;
        assert!(messenger
            .keyboard_edits()
            .iter()
            .any(|(_, t, _)| t.contains("kept")));
    }

    #[tokio::test]
    async fn cancel_discards_pending_entry() {
        let (d, store, messenger) = dispatcher().await;

        run(&d, vec![command("new"), text("draft"), command("cancel")]).await;

        assert!(store.list_entries(USER, 10).await.unwrap().is_empty());
        assert!(messenger.sent_html().iter().any(|s| s.contains("Cancelled")));

        // Back to idle.
        run(&d, vec![text("hello?")]).await;
        assert!(messenger.sent_html().iter().any(|s| s.contains("Use /help")));
    }

    #[tokio::test]
    async fn start_registers_once() {
        let (d, store, messenger) = dispatcher().await;

        run(&d, vec![command("start"), command("start")]).await;
        assert_eq!(
            messenger
                .sent_html()
                .iter()
                .filter(|s| s.contains("Personal diary"))
                .count(),
            2
        );

        // Second start did not clobber registration data.
        let stats = store.stats(USER).await.unwrap();
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn stats_before_start_hints_at_registration() {
        let (d, _, messenger) = dispatcher().await;

        run(&d, vec![command("stats")]).await;
        assert!(messenger
            .sent_html()
            .iter()
            .any(|s| s.contains("Send /start first")));
    }

    #[tokio::test]
    async fn stats_after_entries_sums_up() {
        let (d, _, messenger) = dispatcher().await;

        run(
            &d,
            vec![
                command("start"),
                command("new"),
                text("abcd"),
                command("done"),
                command("stats"),
            ],
        )
        .await;

        let texts = messenger.sent_html();
        assert!(texts.iter().any(|s| s.contains("Entries: 1")));
        assert!(texts.iter().any(|s| s.contains("Characters: 4")));
    }

    #[tokio::test]
    async fn unknown_callback_tag_is_answered_benignly() {
        let (d, _, messenger) = dispatcher().await;

        run(&d, vec![callback("askuser:whatever")]).await;

        let answers = messenger.callback_answers();
        assert_eq!(answers.len(), 1);
        assert!(answers[0].1.as_deref().unwrap_or("").contains("no longer active"));
    }

    #[tokio::test]
    async fn unknown_command_gets_help_hint() {
        let (d, _, messenger) = dispatcher().await;
        run(&d, vec![command("frobnicate")]).await;
        assert!(messenger.sent_html().iter().any(|s| s.contains("Use /help")));
    }

    #[tokio::test]
    async fn expire_idle_cancels_abandoned_compose() {
        let (d, store, messenger) = dispatcher().await;

        run(&d, vec![command("new"), text("forgotten")]).await;
        d.expire_idle(Duration::ZERO).await;

        assert!(store.list_entries(USER, 10).await.unwrap().is_empty());
        assert!(messenger.sent_html().iter().any(|s| s.contains("Cancelled")));

        // Cancelled with explicit-cancel semantics: the user is idle again.
        run(&d, vec![text("anyone there?")]).await;
        assert!(messenger.sent_html().iter().any(|s| s.contains("Use /help")));
    }

    #[tokio::test]
    async fn expiry_sweep_leaves_recently_active_sessions_alone() {
        let (d, store, messenger) = dispatcher().await;

        run(&d, vec![command("new"), text("still here")]).await;
        d.expire_idle(Duration::from_secs(3600)).await;

        assert!(!messenger.sent_html().iter().any(|s| s.contains("Cancelled")));
        run(&d, vec![command("done")]).await;
        let entries = store.list_entries(USER, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "still here");
    }

    #[tokio::test]
    async fn users_do_not_share_sessions() {
        let (d, store, _) = dispatcher().await;

        run(&d, vec![command("new"), text("mine")]).await;

        // A different user's /new is not a busy rejection.
        let other = IncomingUpdate::Command(Command {
            chat_id: ChatId(88),
            user_id: UserId(88),
            username: None,
            first_name: None,
            last_name: None,
            name: "new".to_string(),
            args: String::new(),
        });
        d.handle_update(other).await.unwrap();
        d.handle_update(IncomingUpdate::Text(TextMessage {
            chat_id: ChatId(88),
            user_id: UserId(88),
            text: "yours".to_string(),
        }))
        .await
        .unwrap();
        d.handle_update(IncomingUpdate::Command(Command {
            chat_id: ChatId(88),
            user_id: UserId(88),
            username: None,
            first_name: None,
            last_name: None,
            name: "done".to_string(),
            args: String::new(),
        }))
        .await
        .unwrap();

        run(&d, vec![command("done")]).await;

        let mine = store.list_entries(USER, 10).await.unwrap();
        let yours = store.list_entries(UserId(88), 10).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].text, "mine");
        assert_eq!(yours.len(), 1);
        assert_eq!(yours[0].text, "yours");
    }
}
