//! Telegram update handlers: map teloxide updates into the core dispatcher.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use dtb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::{self, IncomingUpdate},
};

use crate::router::AppState;

/// Split `/cmd@botname arg1 ...` into a lowercase command name and its args.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        // Voice/photo/document messages are out of scope for this bot.
        tracing::debug!(chat_id = msg.chat.id.0, "ignoring non-text message");
        return Ok(());
    };

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = UserId(user.id.0 as i64);

    let update = if text.starts_with('/') {
        let (name, args) = parse_command(text);
        IncomingUpdate::Command(types::Command {
            chat_id,
            user_id,
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
            name,
            args,
        })
    } else {
        IncomingUpdate::Text(types::TextMessage {
            chat_id,
            user_id,
            text: text.to_string(),
        })
    };

    if let Err(err) = state.dispatcher.handle_update(update).await {
        tracing::error!(chat_id = chat_id.0, error = %err, "handling message failed");
    }

    Ok(())
}

pub async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else {
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };

    let chat_id = ChatId(message.chat.id.0);
    let update = IncomingUpdate::Callback(types::CallbackQuery {
        chat_id,
        user_id: UserId(q.from.id.0 as i64),
        callback_id: q.id.clone(),
        data,
        message: Some(MessageRef {
            chat_id,
            message_id: MessageId(message.id.0),
        }),
    });

    // The dispatcher answers the callback query itself.
    if let Err(err) = state.dispatcher.handle_update(update).await {
        tracing::error!(chat_id = chat_id.0, error = %err, "handling callback failed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing_strips_bot_suffix() {
        assert_eq!(parse_command("/new"), ("new".to_string(), String::new()));
        assert_eq!(
            parse_command("/list@diary_bot"),
            ("list".to_string(), String::new())
        );
        assert_eq!(
            parse_command("/Stats  extra args "),
            ("stats".to_string(), "extra args".to_string())
        );
        assert_eq!(parse_command("/"), (String::new(), String::new()));
    }
}
