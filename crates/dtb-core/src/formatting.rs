//! Reply texts, keyboards and rendering helpers.
//!
//! Replies are Telegram-flavored HTML; user-supplied text is always escaped
//! before it is embedded.

use chrono::{DateTime, Local, Utc};

use crate::{
    domain::EntryId,
    messaging::types::InlineKeyboard,
    store::{Entry, EntrySummary, UserStats},
};

/// Callback tags carried by inline buttons. Exact shapes are part of the
/// deployed transport contract, do not change them.
pub const CB_DONE: &str = "done";
pub const CB_BACK: &str = "back";
pub const CB_CLOSE: &str = "close";
pub const CB_SHOW_PREFIX: &str = "show_";

pub fn show_tag(id: EntryId) -> String {
    format!("{CB_SHOW_PREFIX}{id}")
}

pub fn parse_show_tag(data: &str) -> Option<EntryId> {
    data.strip_prefix(CB_SHOW_PREFIX)?
        .parse::<i64>()
        .ok()
        .map(EntryId)
}

/// Paragraph separator used when joining compose chunks into one body.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

pub fn join_chunks(parts: &[String]) -> String {
    parts.join(PARAGRAPH_SEPARATOR)
}

/// Character count as reported to the user. Counted on the joined body, so
/// the paragraph separators between chunks are included.
pub fn char_count(body: &str) -> usize {
    body.chars().count()
}

pub fn word_count(body: &str) -> usize {
    body.split_whitespace().count()
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn welcome_text() -> String {
    "📘 <b>Personal diary</b>\n\n\
     Write down your thoughts and events. Available commands:\n\
     /new - new entry\n\
     /list - browse entries\n\
     /stats - statistics\n\
     /help - help"
        .to_string()
}

pub fn help_text() -> String {
    "ℹ️ <b>Help</b>\n\n\
     /new - create an entry\n\
     /list - browse entries\n\
     /stats - your statistics\n\
     /cancel - abort the current flow"
        .to_string()
}

pub fn compose_prompt_text() -> String {
    "✍️ Write the text of your entry. Several messages are fine.\n\
     Press “Done” or send /done when you are finished."
        .to_string()
}

pub fn compose_keyboard() -> InlineKeyboard {
    let mut kb = InlineKeyboard::default();
    kb.push("✅ Done", CB_DONE);
    kb
}

pub fn entry_saved_text(id: EntryId, chars: usize, words: usize) -> String {
    format!("📝 Entry #{id} saved!\nCharacters: {chars}, words: {words}")
}

pub fn nothing_to_save_text() -> String {
    "✍️ Nothing to save yet. Write some text first, or send /cancel.".to_string()
}

pub fn cancelled_text() -> String {
    "❌ Cancelled".to_string()
}

pub fn nothing_active_text() -> String {
    "Nothing to cancel.".to_string()
}

pub fn busy_text() -> String {
    "⚠️ You have an unfinished flow. Press “Done” or send /done to save, or /cancel to discard."
        .to_string()
}

pub fn idle_hint_text() -> String {
    "Use /help".to_string()
}

pub fn stale_control_notice() -> String {
    "This menu is no longer active".to_string()
}

pub fn no_entries_text() -> String {
    "📭 No entries yet. Send /new to write the first one.".to_string()
}

pub fn list_text() -> String {
    "📚 Your entries:".to_string()
}

pub fn list_keyboard(entries: &[EntrySummary]) -> InlineKeyboard {
    let mut kb = InlineKeyboard::default();
    for entry in entries {
        kb.push(short_date(entry.created_at), show_tag(entry.id));
    }
    kb.push("❌ Close", CB_CLOSE);
    kb
}

/// Entry view, clipped so the rendered message fits the transport's
/// message length cap.
pub fn entry_view_text(entry: &Entry, max_len: usize) -> String {
    let header = format!("📅 {}\n\n", full_date(entry.created_at));
    let room = max_len.saturating_sub(char_count(&header));
    format!("{header}{}", escape_html(&clip_chars(&entry.text, room)))
}

fn clip_chars(text: &str, max: usize) -> String {
    if char_count(text) <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

pub fn entry_view_keyboard() -> InlineKeyboard {
    let mut kb = InlineKeyboard::default();
    kb.push("🔙 Back", CB_BACK);
    kb.push("❌ Close", CB_CLOSE);
    kb
}

pub fn entry_missing_text() -> String {
    "⚠️ That entry could not be found.".to_string()
}

pub fn closed_text() -> String {
    "👋 Closed".to_string()
}

pub fn storage_failure_text() -> String {
    "❌ Something went wrong, please try again.".to_string()
}

pub fn unregistered_text() -> String {
    "Send /start first so I know who you are.".to_string()
}

pub fn stats_text(stats: &UserStats, now: DateTime<Utc>) -> String {
    let used = stats.usage_duration(now);
    format!(
        "📊 <b>Statistics</b>\n\n\
         📅 Registered: {}\n\
         ⏳ Using for: {}\n\
         📝 Entries: {}\n\
         🔤 Characters: {}\n\
         📏 Average: {} chars/entry",
        reg_date(stats.registered_at),
        format_duration(used.num_seconds()),
        stats.entry_count,
        stats.total_chars,
        stats.average_len(),
    )
}

fn short_date(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%d.%m %H:%M").to_string()
}

fn full_date(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string()
}

fn reg_date(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%d.%m.%Y").to_string()
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let mins = (seconds % 3600) / 60;
    format!("{days}d {hours}h {mins}m")
}
