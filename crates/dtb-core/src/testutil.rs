//! Shared in-memory fakes for engine and dispatcher tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Records every outbound call; message ids are allocated sequentially so
/// tests can follow in-place edits.
#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<String>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    keyboards: Mutex<Vec<(ChatId, String, InlineKeyboard)>>,
    keyboard_edits: Mutex<Vec<(MessageRef, String, InlineKeyboard)>>,
    answers: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        }
    }

    pub fn sent_html(&self) -> Vec<String> {
        self.sends.lock().unwrap().clone()
    }

    pub fn html_edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn keyboard_sends(&self) -> Vec<(ChatId, String, InlineKeyboard)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn keyboard_edits(&self) -> Vec<(MessageRef, String, InlineKeyboard)> {
        self.keyboard_edits.lock().unwrap().clone()
    }

    pub fn callback_answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.lock().unwrap().clone()
    }

    /// Every text shown to the user, whatever call delivered it.
    pub fn all_texts(&self) -> Vec<String> {
        let mut out = self.sent_html();
        out.extend(self.html_edits().into_iter().map(|(_, t)| t));
        out.extend(self.keyboard_sends().into_iter().map(|(_, t, _)| t));
        out.extend(self.keyboard_edits().into_iter().map(|(_, t, _)| t));
        out
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.sends.lock().unwrap().push(html.to_string());
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.keyboards
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), keyboard));
        Ok(self.alloc(chat_id))
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.keyboard_edits
            .lock()
            .unwrap()
            .push((msg, text.to_string(), keyboard));
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answers
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(|s| s.to_string())));
        Ok(())
    }
}
