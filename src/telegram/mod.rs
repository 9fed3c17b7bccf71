//! Telegram adapter: slash commands, access guard and channel notices.
//!
//! Commands arrive through the teloxide dispatcher; every guarded command is
//! checked against an [`AccessPolicy`] before it runs. Notices produced by
//! the monitor and report tasks arrive on an mpsc queue and are posted to the
//! configured channel; each send result goes back to the waiting notifier.

use std::sync::Arc;

use anyhow::Context;

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::access::{permission_for, AccessPolicy, Permission};
use crate::config::Config;
use crate::engine::{Actor, Engine};
use crate::notify::{Notice, OutboundNotice};

pub mod commands;
pub mod ui;

// ---------------------------------------------------------------------------
// Shared state for handler injection
// ---------------------------------------------------------------------------

/// Shared dependencies injected into teloxide handlers via `dptree::deps!`.
#[derive(Clone)]
struct SharedState {
    config: Arc<Config>,
    engine: Arc<Engine>,
}

/// The caller of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Telegram user id.
    pub user_id: i64,
    /// Telegram username, if set.
    pub username: Option<String>,
}

impl Caller {
    /// Build a caller from a Telegram user id.
    ///
    /// teloxide uses u64 for user IDs; the store keeps i64. Ids that do not
    /// fit yield `None`.
    pub fn from_telegram(user_id: u64, username: Option<String>) -> Option<Self> {
        let user_id = i64::try_from(user_id).ok()?;
        Some(Self { user_id, username })
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run the Telegram bot.
///
/// Spawns the outbound notice sender, then runs the command dispatcher until
/// Ctrl+C.
pub async fn run_telegram(
    bot_token: &str,
    config: Arc<Config>,
    engine: Arc<Engine>,
    mut outbound_rx: mpsc::Receiver<OutboundNotice>,
) {
    let bot = Bot::new(bot_token);

    let outbound_bot = bot.clone();
    let generator = config.generator.name.clone();
    let channel = config.telegram.channel_id.as_deref().map(ui::parse_recipient);
    let keyboard = config
        .telegram
        .bot_url
        .as_deref()
        .and_then(ui::bot_link_keyboard);
    let _outbound_handle = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let result = match channel.clone() {
                Some(chat) => {
                    send_notice(&outbound_bot, chat, &generator, &outbound.notice, keyboard.clone())
                        .await
                }
                None => Err(anyhow::anyhow!("telegram.channel_id is not set")),
            };
            outbound.complete(result);
        }
    });

    let shared = SharedState { config, engine };
    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    info!("telegram dispatcher starting");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![shared])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn send_notice(
    bot: &Bot,
    chat: Recipient,
    generator: &str,
    notice: &Notice,
    keyboard: Option<teloxide::types::InlineKeyboardMarkup>,
) -> anyhow::Result<()> {
    let text = ui::render_notice(generator, notice);
    let mut req = bot.send_message(chat, text).parse_mode(ParseMode::Html);
    if let Some(markup) = keyboard {
        req = req.reply_markup(markup);
    }
    req.await.context("failed to send channel notice")?;
    debug!(notice = ?notice, "channel notice sent");
    Ok(())
}

// ---------------------------------------------------------------------------
// Message handler
// ---------------------------------------------------------------------------

async fn handle_message(bot: Bot, msg: Message, state: SharedState) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    let Some(caller) = Caller::from_telegram(user.id.0, user.username.clone()) else {
        warn!(user_id = user.id.0, "telegram user id out of range, ignoring command");
        return Ok(());
    };
    debug!(user_id = caller.user_id, "telegram command received");

    let reply = dispatch_command(text, &state.config, &state.engine, &caller).await;
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Split `/cmd@bot args` into `("cmd", "args")`.
pub fn split_command(text: &str) -> (&str, &str) {
    let without_slash = text.strip_prefix('/').unwrap_or(text);
    let (full_command, args) = match without_slash.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (without_slash, ""),
    };
    let command = full_command.split('@').next().unwrap_or(full_command);
    (command, args)
}

async fn load_policy(config: &Config, engine: &Engine) -> AccessPolicy {
    let whitelist = match engine.store().whitelist().await {
        Ok(users) => users.into_iter().map(|u| u.user_id).collect(),
        Err(e) => {
            warn!(error = %e, "failed to load whitelist, falling back to admin only");
            Vec::new()
        }
    };
    AccessPolicy::new(config.telegram.admin_user_id, whitelist)
}

/// Parse, authorize and run a slash command, returning the HTML reply.
pub async fn dispatch_command(
    text: &str,
    config: &Config,
    engine: &Engine,
    caller: &Caller,
) -> String {
    let (command, args) = split_command(text);
    let now = Utc::now();
    let policy = load_policy(config, engine).await;

    let permission = permission_for(command);
    if !policy.permits(caller.user_id, permission) {
        warn!(user_id = caller.user_id, command, "command denied");
        return match permission {
            Permission::Admin => "This command is for the admin only.".to_owned(),
            _ => format!(
                "You are not allowed to change fuel. Ask the admin to run /allow {}.",
                caller.user_id
            ),
        };
    }

    let generator = config.generator.name.as_str();
    let actor = Actor {
        user_id: Some(caller.user_id),
        username: caller.username.clone(),
    };

    match command {
        "help" | "start" => commands::handle_help(policy.is_admin(caller.user_id)),
        "status" => commands::handle_status(engine, generator, now).await,
        "refuel" => commands::handle_refuel(engine, args, &actor, now).await,
        "reset_fuel" => commands::handle_reset_fuel(engine, args, &actor, now).await,
        "setservice" => commands::handle_setservice(engine, args, now).await,
        "history" => commands::handle_history(engine, args, now).await,
        "rhistory" => commands::handle_refuel_history(engine, args, now).await,
        "month" => commands::handle_month(engine, generator, now).await,
        "whoami" => commands::handle_whoami(
            caller.user_id,
            caller.username.as_deref(),
            policy.allows(caller.user_id),
        ),
        "allow" => commands::handle_allow(engine.store(), args, now).await,
        "deny" => commands::handle_deny(engine.store(), args).await,
        "users" => commands::handle_users(engine.store()).await,
        "settings" => commands::handle_settings(config),
        _ => format!("Unknown command: /{}", ui::escape_html(command)),
    }
}
