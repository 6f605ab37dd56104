//! Letter → Telegram message text (legacy `Markdown` parse mode).

use sealpost_core::{
    domain::Letter,
    formatting::{escape_markdown, escape_markdown_truncated, written_date},
};

/// Telegram's hard ceiling for a single message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;
/// Body budget, well below the ceiling so header and footer always fit.
pub const MAX_BODY_CHARS: usize = 3500;
pub const MAX_LINE_CHARS: usize = 200;

pub const HEADER: &str = "✉️ *A letter from your past self*";

/// Compose the message for `letter`.
///
/// The body is truncated (with `…`) before composition; user text never sits
/// inside an emphasis entity, since legacy Markdown cannot escape there.
pub fn compose_message(letter: &Letter, app_url: &str) -> String {
    let mut parts = vec![HEADER.to_string()];

    let salutation = letter.salutation.trim();
    if !salutation.is_empty() {
        parts.push(escape_markdown_truncated(salutation, MAX_LINE_CHARS));
    }

    parts.push(escape_markdown_truncated(letter.body.trim(), MAX_BODY_CHARS));

    let sign_off = letter.sign_off.trim();
    if !sign_off.is_empty() {
        parts.push(escape_markdown_truncated(sign_off, MAX_LINE_CHARS));
    }

    parts.push(format!("_Written on {}_", written_date(letter.created_at)));
    parts.push(format!(
        "Write your next letter at {}",
        escape_markdown(app_url)
    ));

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, TimeZone, Utc};
    use sealpost_core::{
        domain::{LetterId, LetterState, UserId},
        formatting::ELLIPSIS,
    };

    fn letter(body: &str) -> Letter {
        Letter {
            id: LetterId("l1".into()),
            owner: UserId("u1".into()),
            state: LetterState::Sealed,
            salutation: "Dear me,".into(),
            body: body.into(),
            sign_off: "Past me".into(),
            channel: "telegram".into(),
            recipient_email: None,
            telegram_chat: Some("42".into()),
            deliver_on: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap(),
            sealed_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn short_letters_are_composed_in_order() {
        let msg = compose_message(&letter("See you soon."), "https://sealpost.app");
        let header = msg.find(HEADER).unwrap();
        let sal = msg.find("Dear me,").unwrap();
        let body = msg.find("See you soon.").unwrap();
        let sign = msg.find("Past me").unwrap();
        let date = msg.find("_Written on March 3, 2025_").unwrap();
        let footer = msg.find("https://sealpost.app").unwrap();
        assert!(header < sal && sal < body && body < sign && sign < date && date < footer);
        assert!(!msg.contains(ELLIPSIS));
    }

    #[test]
    fn long_bodies_are_truncated_under_the_limit() {
        let msg = compose_message(&letter(&"a".repeat(10_000)), "https://sealpost.app");
        assert!(msg.contains(&format!("{}{}", "a".repeat(MAX_BODY_CHARS - 1), ELLIPSIS)));
        assert!(!msg.contains(&"a".repeat(MAX_BODY_CHARS)));
        assert!(msg.chars().count() < TELEGRAM_MESSAGE_LIMIT);
    }

    #[test]
    fn worst_case_markup_still_fits() {
        let mut l = letter(&"_*".repeat(10_000));
        l.salutation = "[".repeat(1_000);
        l.sign_off = "`".repeat(1_000);
        let msg = compose_message(&l, "https://sealpost.app");
        assert!(msg.chars().count() < TELEGRAM_MESSAGE_LIMIT);
    }

    #[test]
    fn user_markup_is_escaped() {
        let msg = compose_message(&letter("my_var is *bold*"), "https://sealpost.app");
        assert!(msg.contains(r"my\_var is \*bold\*"));
    }
}
