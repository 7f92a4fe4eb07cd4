//! Per-user conversation sessions and the engine that executes flow actions.
//!
//! The engine runs the pure transition table from [`crate::flow`] and then
//! performs the resulting effect (store call, reply, in-place menu edit).
//! The next state is committed only after a fallible effect succeeds, so a
//! storage failure leaves the session exactly where it was.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::{
    domain::{ChatId, MessageRef, UserId},
    errors::Error,
    flow::{self, FlowAction, FlowEvent, FlowState, Step},
    formatting,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    store::DiaryStore,
    Result,
};

/// Transient per-user conversation state. Held in memory only.
#[derive(Debug)]
pub struct Session {
    pub state: FlowState,
    /// The message carrying the active menu, edited in place while the user
    /// navigates list -> entry -> back.
    pub menu: Option<MessageRef>,
    /// Chat the conversation happens in; recorded on first contact so the
    /// idle-expiry policy knows where to send its cancellation notice.
    pub chat: Option<ChatId>,
    pub last_activity: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            state: FlowState::Idle,
            menu: None,
            chat: None,
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Owned registry of conversation sessions, keyed by user id.
///
/// Locking the per-user session mutex for the whole handling of one event
/// serializes that user's events while different users progress
/// concurrently.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<i64, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<Session> {
        let session = {
            let mut map = self.inner.lock().await;
            map.entry(user_id.0)
                .or_insert_with(|| Arc::new(Mutex::new(Session::new())))
                .clone()
        };
        session.lock_owned().await
    }

    /// Sessions whose last activity is older than `max_idle`.
    ///
    /// Idle sessions are dropped from the map; in-progress ones are returned
    /// so the caller can cancel them with explicit-cancel semantics.
    pub async fn stale_sessions(&self, max_idle: Duration) -> Vec<(UserId, Arc<Mutex<Session>>)> {
        let snapshot: Vec<(i64, Arc<Mutex<Session>>)> = {
            let map = self.inner.lock().await;
            map.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        let mut stale = Vec::new();
        let mut drop_keys = Vec::new();
        for (key, session) in snapshot {
            let guard = session.lock().await;
            if guard.last_activity.elapsed() < max_idle {
                continue;
            }
            if guard.state.is_idle() {
                drop_keys.push(key);
            } else {
                drop(guard);
                stale.push((UserId(key), session));
            }
        }

        if !drop_keys.is_empty() {
            let mut map = self.inner.lock().await;
            for key in drop_keys {
                map.remove(&key);
            }
        }

        stale
    }
}

/// Where an event came from, so replies can reuse the triggering message.
#[derive(Clone, Debug)]
pub enum EventOrigin {
    Message,
    Callback {
        callback_id: String,
        message: Option<MessageRef>,
    },
}

/// Executes flow transitions against the store and the messaging port.
pub struct ConversationEngine {
    store: Arc<DiaryStore>,
    messenger: Arc<dyn MessagingPort>,
    list_limit: u32,
}

impl ConversationEngine {
    pub fn new(store: Arc<DiaryStore>, messenger: Arc<dyn MessagingPort>, list_limit: u32) -> Self {
        Self {
            store,
            messenger,
            list_limit,
        }
    }

    pub async fn apply(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        session: &mut Session,
        event: FlowEvent,
        origin: EventOrigin,
    ) -> Result<()> {
        let state = std::mem::replace(&mut session.state, FlowState::Idle);
        let Step { next, action } = flow::step(state, event);

        // Outbound replies are best-effort: a transport hiccup must never
        // leave the session in the placeholder state or drop pending chunks.
        let mut committed = next;
        let mut ack: Option<String> = None;

        match action {
            FlowAction::PromptCompose => {
                session.menu = self
                    .send_keyboard(
                        chat_id,
                        &formatting::compose_prompt_text(),
                        formatting::compose_keyboard(),
                    )
                    .await;
            }

            FlowAction::ChunkBuffered => {
                // No terminal reply while composing.
            }

            FlowAction::SaveEntry { parts } => {
                let body = formatting::join_chunks(&parts);
                match self.store.add_entry(user_id, &body).await {
                    Ok(entry_id) => {
                        let text = formatting::entry_saved_text(
                            entry_id,
                            formatting::char_count(&body),
                            formatting::word_count(&body),
                        );
                        self.reply_or_edit(chat_id, session, &origin, &text).await;
                        session.menu = None;
                    }
                    Err(Error::Validation(_)) => {
                        // Whitespace-only chunks; keep composing.
                        committed = FlowState::Composing { parts };
                        self.send(chat_id, &formatting::nothing_to_save_text()).await;
                    }
                    Err(err) => {
                        tracing::warn!(user_id = user_id.0, error = %err, "saving entry failed");
                        committed = FlowState::Composing { parts };
                        self.send(chat_id, &formatting::storage_failure_text()).await;
                    }
                }
            }

            FlowAction::NothingToSave => {
                self.send(chat_id, &formatting::nothing_to_save_text()).await;
            }

            FlowAction::Cancelled => {
                session.menu = None;
                self.send(chat_id, &formatting::cancelled_text()).await;
            }

            FlowAction::NothingActive => {
                self.send(chat_id, &formatting::nothing_active_text()).await;
            }

            FlowAction::OpenList => match self.store.list_entries(user_id, self.list_limit).await {
                Ok(entries) if entries.is_empty() => {
                    committed = FlowState::Idle;
                    self.send(chat_id, &formatting::no_entries_text()).await;
                }
                Ok(entries) => {
                    session.menu = self
                        .send_keyboard(
                            chat_id,
                            &formatting::list_text(),
                            formatting::list_keyboard(&entries),
                        )
                        .await;
                }
                Err(err) => {
                    tracing::warn!(user_id = user_id.0, error = %err, "listing entries failed");
                    committed = FlowState::Idle;
                    self.send(chat_id, &formatting::storage_failure_text()).await;
                }
            },

            FlowAction::ShowEntry(entry_id) => match self.store.get_entry(entry_id).await {
                Ok(entry) => {
                    let max_len = self.messenger.capabilities().max_message_len;
                    self.show_menu(
                        chat_id,
                        session,
                        &formatting::entry_view_text(&entry, max_len),
                        formatting::entry_view_keyboard(),
                    )
                    .await;
                }
                Err(Error::NotFound(_)) => {
                    committed = FlowState::Browsing;
                    ack = Some(formatting::entry_missing_text());
                    self.send(chat_id, &formatting::entry_missing_text()).await;
                }
                Err(err) => {
                    tracing::warn!(user_id = user_id.0, error = %err, "loading entry failed");
                    committed = FlowState::Browsing;
                    self.send(chat_id, &formatting::storage_failure_text()).await;
                }
            },

            FlowAction::ReopenList => match self.store.list_entries(user_id, self.list_limit).await
            {
                Ok(entries) => {
                    self.show_menu(
                        chat_id,
                        session,
                        &formatting::list_text(),
                        formatting::list_keyboard(&entries),
                    )
                    .await;
                }
                Err(err) => {
                    tracing::warn!(user_id = user_id.0, error = %err, "listing entries failed");
                    committed = FlowState::Idle;
                    self.send(chat_id, &formatting::storage_failure_text()).await;
                }
            },

            FlowAction::Closed => {
                let text = formatting::closed_text();
                self.reply_or_edit(chat_id, session, &origin, &text).await;
                session.menu = None;
            }

            FlowAction::RejectBusy => {
                self.send(chat_id, &formatting::busy_text()).await;
            }

            FlowAction::UnexpectedText => {
                self.send(chat_id, &formatting::idle_hint_text()).await;
            }

            FlowAction::StaleControl => {
                ack = Some(formatting::stale_control_notice());
            }
        }

        session.state = committed;
        session.touch();

        if let EventOrigin::Callback { callback_id, .. } = &origin {
            let _ = self
                .messenger
                .answer_callback_query(callback_id, ack.as_deref())
                .await;
        }

        Ok(())
    }

    /// Cancel a session abandoned past the idle timeout. Same semantics as
    /// an explicit cancel signal. Idleness is re-checked under the session
    /// lock: a user event may have landed since the staleness snapshot was
    /// taken, and fresh input must never be swept away.
    pub async fn expire(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        session: &mut Session,
        max_idle: Duration,
    ) -> Result<()> {
        if session.state.is_idle() || session.last_activity.elapsed() < max_idle {
            return Ok(());
        }
        tracing::info!(user_id = user_id.0, "expiring idle conversation session");
        self.apply(chat_id, user_id, session, FlowEvent::Cancel, EventOrigin::Message)
            .await
    }

    async fn send(&self, chat_id: ChatId, text: &str) {
        if let Err(err) = self.messenger.send_html(chat_id, text).await {
            tracing::warn!(chat_id = chat_id.0, error = %err, "sending reply failed");
        }
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Option<MessageRef> {
        match self.messenger.send_inline_keyboard(chat_id, text, keyboard).await {
            Ok(msg) => Some(msg),
            Err(err) => {
                tracing::warn!(chat_id = chat_id.0, error = %err, "sending keyboard failed");
                None
            }
        }
    }

    /// Edit the active menu message in place, or send a fresh one when the
    /// transport lost it.
    async fn show_menu(
        &self,
        chat_id: ChatId,
        session: &mut Session,
        text: &str,
        keyboard: InlineKeyboard,
    ) {
        if let Some(menu) = session.menu {
            if self
                .messenger
                .edit_inline_keyboard(menu, text, keyboard.clone())
                .await
                .is_ok()
            {
                return;
            }
        }
        session.menu = self.send_keyboard(chat_id, text, keyboard).await;
    }

    async fn reply_or_edit(
        &self,
        chat_id: ChatId,
        session: &Session,
        origin: &EventOrigin,
        text: &str,
    ) {
        let target = match origin {
            EventOrigin::Callback { message, .. } => message.or(session.menu),
            EventOrigin::Message => None,
        };
        match target {
            Some(msg) => {
                if self.messenger.edit_html(msg, text).await.is_err() {
                    self.send(chat_id, text).await;
                }
            }
            None => self.send(chat_id, text).await,
        }
    }
}
