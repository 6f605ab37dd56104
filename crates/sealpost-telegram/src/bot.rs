//! Link bot: tells a user which chat id to put on a Telegram letter.
//!
//! Letters can only reach chats that have talked to the bot first, so the
//! web flow sends users here to press /start.

use teloxide::{dispatching::Dispatcher, prelude::*, types::ParseMode};
use tokio_util::sync::CancellationToken;

use sealpost_core::formatting::escape_html;

pub async fn run_polling(token: String, cancel: CancellationToken) -> anyhow::Result<()> {
    let bot = Bot::new(token);

    match bot.get_me().await {
        Ok(me) => tracing::info!("link bot started: @{}", me.username()),
        Err(e) => tracing::warn!("link bot could not identify itself: {e}"),
    }

    let handler = Update::filter_message().endpoint(handle_message);
    let mut dispatcher = Dispatcher::builder(bot, handler).build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        if let Ok(done) = shutdown.shutdown() {
            done.await;
        }
    });

    dispatcher.dispatch().await;
    tracing::info!("link bot stopped");
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let username = msg.from().and_then(|u| u.username.clone());
    let reply = reply_for(text, msg.chat.id.0, username.as_deref());

    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

fn parse_command(text: &str) -> Option<String> {
    // Telegram may send `/cmd@botname arg1 ...`
    let first = text.trim().split_whitespace().next()?;
    let cmd = first.strip_prefix('/')?;
    Some(cmd.split('@').next().unwrap_or("").to_lowercase())
}

pub fn reply_for(text: &str, chat_id: i64, username: Option<&str>) -> String {
    match parse_command(text).as_deref() {
        Some("start") | Some("id") => {
            let mut lines = vec![
                "✉️ <b>Sealpost</b>".to_string(),
                String::new(),
                format!("Your chat id is <code>{chat_id}</code>."),
            ];
            if let Some(name) = username.filter(|n| !n.is_empty()) {
                lines.push(format!(
                    "You can also use your username <code>@{}</code>.",
                    escape_html(name)
                ));
            }
            lines.push(String::new());
            lines.push(
                "Paste it into the Telegram field of your letter, \
                 and it will arrive here on the day you chose."
                    .to_string(),
            );
            lines.join("\n")
        }
        _ => "Send /start to see the chat id for your letters.".to_string(),
    }
}
