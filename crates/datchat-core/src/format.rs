//! Room-line formatting shared by the broker and its log files.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Time-of-day prefix used on every room line.
pub const CHAT_TIME_FORMAT: &str = "%H:%M:%S";

/// Formats one chat room line: `HH:MM:SS  <sender>:<pad>  <text>`.
///
/// The sender column is padded with spaces to `pad_to` characters so that
/// messages line up in a monospace view. Senders longer than `pad_to` are
/// never truncated.
pub fn format_chat_line<Tz>(sender: &str, text: &str, pad_to: usize, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let padding = pad_to.saturating_sub(sender.chars().count());
    format!(
        "{}  {}:{}  {}",
        at.format(CHAT_TIME_FORMAT),
        sender,
        " ".repeat(padding),
        text
    )
}
