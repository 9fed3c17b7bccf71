//! Telegram slash command handlers.
//!
//! Each function handles one command and returns an HTML reply. Access checks
//! happen in the dispatcher before these run.

use chrono::{DateTime, Utc};
use tracing::error;

use crate::config::Config;
use crate::engine::{Actor, Engine, EngineError, ServiceSetting};
use crate::fuel::format_hours;
use crate::notify::Notice;
use crate::reports::monthly_report;
use crate::store::StateStore;
use crate::telegram::ui::{
    escape_html, format_litres, render_episodes, render_notice, render_refuels,
    render_status,
};
use crate::timefmt::local_minute;

/// List the commands available to the caller.
pub fn handle_help(is_admin: bool) -> String {
    let mut lines = vec![
        "<b>Commands:</b>",
        "",
        "/status — fuel, run-time and service",
        "/history [days] — recent runs (default 1 day)",
        "/rhistory &lt;days&gt; — recent refuels",
        "/month — last month's totals",
        "/refuel &lt;litres&gt; — record fuel added",
        "/reset_fuel &lt;litres&gt; — set the measured fuel level",
        "/whoami — your Telegram id",
    ];
    if is_admin {
        lines.extend([
            "",
            "<b>Admin:</b>",
            "/setservice &lt;hours&gt; — service after N run-hours (0 clears)",
            "/allow &lt;user_id&gt; [name] — allow fuel commands",
            "/deny &lt;user_id&gt; — revoke",
            "/users — list allowed users",
            "/settings — show configuration",
        ]);
    }
    lines.join("\n")
}

fn engine_error(e: &EngineError) -> String {
    match e {
        EngineError::Validation(msg) => format!("\u{26A0}\u{FE0F} {}", escape_html(msg)),
        EngineError::Store(inner) => {
            error!(error = %inner, "command failed to persist");
            "Internal error, nothing was changed. Try again.".to_owned()
        }
    }
}

/// Parse a single numeric argument; accepts `12.5` and `12,5`.
pub fn parse_number(args: &str) -> Option<f64> {
    let first = args.split_whitespace().next()?;
    first.replace(',', ".").parse::<f64>().ok()
}

/// Current status.
pub async fn handle_status(engine: &Engine, generator: &str, now: DateTime<Utc>) -> String {
    match engine.status(now).await {
        Ok(status) => render_status(generator, &status),
        Err(e) => engine_error(&e),
    }
}

/// `/refuel <litres>`.
pub async fn handle_refuel(engine: &Engine, args: &str, actor: &Actor, now: DateTime<Utc>) -> String {
    let Some(amount) = parse_number(args) else {
        return "Usage: /refuel &lt;litres&gt;".to_owned();
    };
    match engine.refuel(amount, actor, now).await {
        Ok(adj) => {
            let mut reply = format!(
                "\u{26FD} Added {added}. Fuel: {before} \u{2192} {after}\nRemaining: ~{remaining}",
                added = format_litres(amount),
                before = format_litres(adj.event.fuel_before),
                after = format_litres(adj.event.fuel_after),
                remaining = format_hours(adj.remaining_hours),
            );
            if adj.event.fuel_before + amount > engine.settings().fuel.tank_capacity {
                reply.push_str(&format!(
                    "\nTank is full; only {} fit.",
                    format_litres((adj.event.fuel_after - adj.event.fuel_before).max(0.0))
                ));
            }
            reply
        }
        Err(e) => engine_error(&e),
    }
}

/// `/reset_fuel <litres>`.
pub async fn handle_reset_fuel(
    engine: &Engine,
    args: &str,
    actor: &Actor,
    now: DateTime<Utc>,
) -> String {
    let Some(value) = parse_number(args) else {
        return "Usage: /reset_fuel &lt;litres&gt;".to_owned();
    };
    match engine.reset_fuel(value, actor, now).await {
        Ok(adj) => format!(
            "Fuel level set: {before} \u{2192} {after}\nRemaining: ~{remaining}",
            before = format_litres(adj.event.fuel_before),
            after = format_litres(adj.event.fuel_after),
            remaining = format_hours(adj.remaining_hours),
        ),
        Err(e) => engine_error(&e),
    }
}

/// `/setservice <hours>`.
pub async fn handle_setservice(engine: &Engine, args: &str, now: DateTime<Utc>) -> String {
    let Some(hours) = parse_number(args) else {
        return "Usage: /setservice &lt;hours&gt; (0 clears)".to_owned();
    };
    match engine.set_service(hours, now).await {
        Ok(ServiceSetting::Cleared) => "Service reminder cleared.".to_owned(),
        Ok(ServiceSetting::Scheduled { hours, .. }) => {
            format!("\u{1F527} Service due after {} more run-hours.", format_hours(hours))
        }
        Err(e) => engine_error(&e),
    }
}

fn parse_int(args: &str) -> Option<i64> {
    args.split_whitespace().next()?.parse::<i64>().ok()
}

/// `/history [days]`, one day by default.
pub async fn handle_history(engine: &Engine, args: &str, now: DateTime<Utc>) -> String {
    let days = if args.trim().is_empty() {
        1
    } else {
        match parse_int(args) {
            Some(days) => days,
            None => return "Usage: /history [days]".to_owned(),
        }
    };
    match engine.history(days, now).await {
        Ok(episodes) => render_episodes(days, &episodes),
        Err(e) => engine_error(&e),
    }
}

/// `/rhistory <days>`.
pub async fn handle_refuel_history(engine: &Engine, args: &str, now: DateTime<Utc>) -> String {
    let Some(days) = parse_int(args) else {
        return "Usage: /rhistory &lt;days&gt;".to_owned();
    };
    match engine.refuel_history(days, now).await {
        Ok(events) => render_refuels(days, &events),
        Err(e) => engine_error(&e),
    }
}

/// `/month`: previous calendar month.
pub async fn handle_month(engine: &Engine, generator: &str, now: DateTime<Utc>) -> String {
    match monthly_report(engine, now).await {
        Ok(report) => render_notice(generator, &Notice::Monthly(report)),
        Err(e) => engine_error(&e),
    }
}

/// `/whoami`.
pub fn handle_whoami(user_id: i64, username: Option<&str>, allowed: bool) -> String {
    let name = username.map_or_else(|| "-".to_owned(), |u| format!("@{}", escape_html(u)));
    let access = if allowed { "allowed" } else { "read-only" };
    format!("Your id: <code>{user_id}</code>\nUsername: {name}\nFuel commands: {access}")
}

/// `/allow <user_id> [username]`.
pub async fn handle_allow(store: &StateStore, args: &str, now: DateTime<Utc>) -> String {
    let mut parts = args.split_whitespace();
    let Some(user_id) = parts.next().and_then(|v| v.parse::<i64>().ok()) else {
        return "Usage: /allow &lt;user_id&gt; [username]".to_owned();
    };
    let username = parts.next().map(|u| u.trim_start_matches('@'));
    match store.allow_user(user_id, username, now).await {
        Ok(()) => format!("User <code>{user_id}</code> may now adjust fuel."),
        Err(e) => {
            error!(error = %e, user_id, "failed to allow user");
            "Internal error, nothing was changed.".to_owned()
        }
    }
}

/// `/deny <user_id>`.
pub async fn handle_deny(store: &StateStore, args: &str) -> String {
    let Some(user_id) = parse_int(args) else {
        return "Usage: /deny &lt;user_id&gt;".to_owned();
    };
    match store.deny_user(user_id).await {
        Ok(true) => format!("User <code>{user_id}</code> removed."),
        Ok(false) => format!("User <code>{user_id}</code> was not on the list."),
        Err(e) => {
            error!(error = %e, user_id, "failed to deny user");
            "Internal error, nothing was changed.".to_owned()
        }
    }
}

/// `/users`.
pub async fn handle_users(store: &StateStore) -> String {
    match store.whitelist().await {
        Ok(users) if users.is_empty() => "No users allowed besides the admin.".to_owned(),
        Ok(users) => {
            let mut lines = vec!["<b>Allowed users:</b>".to_owned()];
            for user in users {
                let name = user
                    .username
                    .as_deref()
                    .map(|u| format!(" @{}", escape_html(u)))
                    .unwrap_or_default();
                let since = user
                    .added_at
                    .map(|at| format!(" (since {})", local_minute(at)))
                    .unwrap_or_default();
                lines.push(format!("<code>{}</code>{name}{since}", user.user_id));
            }
            lines.join("\n")
        }
        Err(e) => {
            error!(error = %e, "failed to list users");
            "Internal error.".to_owned()
        }
    }
}

/// `/settings`, read-only.
pub fn handle_settings(config: &Config) -> String {
    let fuel = &config.fuel;
    format!(
        "<b>Settings</b>\n\
         Generator: {name} ({address}, {probe:?})\n\
         Tank: {capacity}\n\
         Consumption: {rate:.1} L/h\n\
         Low-fuel alert: below {threshold}\n\
         Probe every {interval}s\n\
         Reports at {hour:02}:{minute:02} (daily: {daily}, monthly: {monthly})",
        name = escape_html(&config.generator.name),
        address = escape_html(&config.generator.address),
        probe = config.generator.probe,
        capacity = format_litres(fuel.tank_capacity),
        rate = fuel.consumption_rate,
        threshold = format_hours(fuel.low_fuel_hours),
        interval = config.monitor.interval_secs,
        hour = config.reports.hour,
        minute = config.reports.minute,
        daily = config.reports.daily,
        monthly = config.reports.monthly,
    )
}
