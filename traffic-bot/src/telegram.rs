//! Telegram transport: turns updates into [`Inbound`] events and sends the
//! resulting [`OutboundMessage`] back.

use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::{BotCommand, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MenuButton};
use tracing::{debug, info, warn};

use crate::clickhouse::ClickHouseClient;
use crate::interaction::{self, Button, Inbound, Interaction, OutboundMessage, UserId};
use crate::period::Period;

type TrafficBot = Interaction<ClickHouseClient>;

/// Telegram's limit for media captions.
const CAPTION_LIMIT: usize = 1024;

fn keyboard(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label(), b.payload()))
            .collect::<Vec<_>>()
    }))
}

fn bot_commands() -> Vec<BotCommand> {
    let mut commands: Vec<BotCommand> = Period::ALL
        .into_iter()
        .map(|p| BotCommand::new(format!("graph_{}", p.token()), p.label()))
        .collect();
    commands.push(BotCommand::new("graph", "Choose a period"));
    commands.push(BotCommand::new("settings", "Display timezone"));
    commands
}

async fn send(bot: &Bot, chat_id: ChatId, message: OutboundMessage) -> ResponseResult<()> {
    let OutboundMessage { text, chart, menu } = message;

    match chart {
        Some(chart) => {
            let photo = InputFile::memory(chart.bytes).file_name(chart.file_name);
            if text.chars().count() <= CAPTION_LIMIT {
                bot.send_photo(chat_id, photo).caption(text).await?;
            } else {
                let headline = text.lines().next().unwrap_or_default().to_owned();
                bot.send_photo(chat_id, photo).caption(headline).await?;
                bot.send_message(chat_id, text).await?;
            }
        }
        None => {
            let request = bot.send_message(chat_id, text);
            match menu {
                Some(rows) => request.reply_markup(keyboard(&rows)).await?,
                None => request.await?,
            };
        }
    }
    Ok(())
}

async fn on_message(bot: Bot, msg: Message, app: Arc<TrafficBot>) -> ResponseResult<()> {
    let (Some(text), Some(user)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };

    let event = Inbound::Text(text.to_owned());
    dispatch(&bot, &app, msg.chat.id, user.id.0, event).await
}

/// Run one event through the core and deliver the reply. Report requests
/// get a progress notice first, edited once the chart is out.
async fn dispatch(
    bot: &Bot,
    app: &TrafficBot,
    chat_id: ChatId,
    user_id: UserId,
    event: Inbound,
) -> ResponseResult<()> {
    let status = match app.pending_period(chat_id.0, &event).await {
        Some(period) => {
            let notice = bot
                .send_message(chat_id, interaction::building_status(period))
                .await?;
            Some((period, notice.id))
        }
        None => None,
    };

    let reply = app.handle_event(chat_id.0, user_id, event).await;
    let delivered = reply.as_ref().is_some_and(|r| r.chart.is_some());
    if let Some(reply) = reply {
        send(bot, chat_id, reply).await?;
    }

    if let Some((period, notice)) = status {
        let text = interaction::finished_status(period, delivered);
        if let Err(e) = bot.edit_message_text(chat_id, notice, text).await {
            warn!("Could not update status message in chat {}: {e}", chat_id.0);
        }
    }
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, app: Arc<TrafficBot>) -> ResponseResult<()> {
    let Some(chat_id) = q.message.as_ref().map(|m| m.chat().id) else {
        return Ok(());
    };
    // Unauthorised chats must not even see the button acknowledged.
    if !app.is_allowed(chat_id.0) {
        debug!("Dropping callback from chat {}", chat_id.0);
        return Ok(());
    }
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = q.data.clone() else {
        return Ok(());
    };
    dispatch(&bot, &app, chat_id, q.from.id.0, Inbound::Callback(data)).await
}

/// Register the command menu and serve updates until Ctrl-C.
pub async fn run(token: &str, app: TrafficBot) -> Result<()> {
    let bot = Bot::new(token);

    bot.set_my_commands(bot_commands())
        .await
        .context("Failed to register bot commands")?;
    bot.set_chat_menu_button()
        .menu_button(MenuButton::Commands)
        .await
        .context("Failed to set chat menu button")?;

    info!("Connected!");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![Arc::new(app)])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped");
    Ok(())
}
