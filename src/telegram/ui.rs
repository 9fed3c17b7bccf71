//! HTML formatting and inline keyboard helpers for Telegram messages.
//!
//! All output uses HTML parse mode (never MarkdownV2).

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Recipient};

use crate::engine::{ServiceStatus, StatusReport};
use crate::fuel::format_hours;
use crate::notify::Notice;
use crate::store::{RefuelEvent, RefuelKind, RunEpisode};
use crate::timefmt::{hours_minutes, local_minute};

/// Escape special HTML characters in user-provided text.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Seconds as `"{h}h {m}m"`.
pub fn format_duration(seconds: i64) -> String {
    let (h, m) = hours_minutes(seconds);
    format!("{h}h {m}m")
}

/// Litres with one decimal.
pub fn format_litres(litres: f64) -> String {
    format!("{litres:.1} L")
}

/// Inline keyboard with a single "Open bot" link, if `url` parses.
pub fn bot_link_keyboard(url: &str) -> Option<InlineKeyboardMarkup> {
    let url = url::Url::parse(url).ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("\u{1F916} Open bot".to_owned(), url),
    ]]))
}

/// Channel target from config: a numeric chat id or `@username`.
pub fn parse_recipient(channel_id: &str) -> Recipient {
    let trimmed = channel_id.trim();
    match trimmed.parse::<i64>() {
        Ok(id) => Recipient::Id(teloxide::types::ChatId(id)),
        Err(_) if trimmed.starts_with('@') => Recipient::ChannelUsername(trimmed.to_owned()),
        Err(_) => Recipient::ChannelUsername(format!("@{trimmed}")),
    }
}

/// Render a notice for the channel.
pub fn render_notice(generator: &str, notice: &Notice) -> String {
    let name = escape_html(generator);
    match notice {
        Notice::Started {
            fuel_left,
            remaining_hours,
        } => format!(
            "\u{26A1} <b>{name} started</b>\n\
             Fuel: {fuel}\n\
             Remaining: ~{remaining}",
            fuel = format_litres(*fuel_left),
            remaining = format_hours(*remaining_hours),
        ),
        Notice::Stopped {
            runtime_seconds,
            fuel_used,
            fuel_left,
            remaining_hours,
        } => format!(
            "\u{1F6D1} <b>{name} stopped</b>\n\
             Ran for: {runtime}\n\
             Fuel used: {used}\n\
             Fuel left: {left}\n\
             Remaining: ~{remaining}",
            runtime = format_duration(*runtime_seconds),
            used = format_litres(*fuel_used),
            left = format_litres(*fuel_left),
            remaining = format_hours(*remaining_hours),
        ),
        Notice::LowFuel {
            fuel_left,
            remaining_hours,
            threshold_hours,
        } => format!(
            "\u{26FD} <b>{name}: low fuel</b>\n\
             Fuel left: {left}\n\
             Remaining: ~{remaining} (threshold {threshold})\n\
             Refuel soon.",
            left = format_litres(*fuel_left),
            remaining = format_hours(*remaining_hours),
            threshold = format_hours(*threshold_hours),
        ),
        Notice::ServiceDue {
            total_runtime_seconds,
        } => format!(
            "\u{1F527} <b>{name}: service due</b>\n\
             Total run-time: {total}\n\
             Set the next interval with /setservice.",
            total = format_duration(*total_runtime_seconds),
        ),
        Notice::Daily(report) => {
            let date = report.date.format("%Y-%m-%d");
            if report.was_running() {
                format!(
                    "\u{1F4CA} <b>{name}: daily report {date}</b>\n\
                     Ran for: {runtime}\n\
                     Fuel used: {used}\n\
                     Fuel left: {left}\n\
                     Remaining: ~{remaining}",
                    runtime = format_duration(report.runtime_seconds),
                    used = format_litres(report.fuel_used),
                    left = format_litres(report.fuel_left),
                    remaining = format_hours(report.remaining_hours),
                )
            } else {
                format!(
                    "\u{1F4CA} <b>{name}: daily report {date}</b>\n\
                     Did not run in the last 24 hours.\n\
                     Fuel left: {left}",
                    left = format_litres(report.fuel_left),
                )
            }
        }
        Notice::Monthly(report) => format!(
            "\u{1F4C5} <b>{name}: monthly report {month}</b>\n\
             Ran for: {runtime}\n\
             Fuel used: {used}\n\
             Refuelled: {added}",
            month = escape_html(&report.month),
            runtime = format_duration(report.runtime_seconds),
            used = format_litres(report.fuel_used),
            added = format_litres(report.refuel_added),
        ),
        Notice::Restarted { at } => format!(
            "\u{1F504} <b>{name} monitor restarted</b> at {at}",
            at = local_minute(*at),
        ),
    }
}

/// Render the `/status` reply.
pub fn render_status(generator: &str, status: &StatusReport) -> String {
    let name = escape_html(generator);
    let state = match status.started_at {
        Some(started) if status.running => {
            format!("\u{1F7E2} running since {}", local_minute(started))
        }
        _ => "\u{1F534} stopped".to_owned(),
    };
    let service = match status.service {
        ServiceStatus::NotSet => "not set".to_owned(),
        ServiceStatus::Remaining { seconds } => format!("in {}", format_duration(seconds)),
        ServiceStatus::Overdue { seconds } => format!("overdue by {}", format_duration(seconds)),
    };
    format!(
        "<b>{name}</b>: {state}\n\
         Fuel: {fuel} of {capacity}\n\
         Remaining: ~{remaining}\n\
         \n\
         <b>Last 24 h:</b> {day_rt}, {day_fuel}\n\
         <b>Last 7 days:</b> {week_rt}, {week_fuel}\n\
         <b>Total run-time:</b> {total}\n\
         <b>Service:</b> {service}",
        fuel = format_litres(status.effective_fuel),
        capacity = format_litres(status.tank_capacity),
        remaining = format_hours(status.remaining_hours),
        day_rt = format_duration(status.day.runtime_seconds),
        day_fuel = format_litres(status.day.fuel_used),
        week_rt = format_duration(status.week.runtime_seconds),
        week_fuel = format_litres(status.week.fuel_used),
        total = format_duration(status.cumulative_runtime_seconds),
    )
}

/// Render run episodes as a `<pre>` table.
pub fn render_episodes(days: i64, episodes: &[RunEpisode]) -> String {
    if episodes.is_empty() {
        return format!("No runs in the last {days} day(s).");
    }
    let mut lines = vec![
        format!("<b>Runs, last {days} day(s):</b>"),
        "<pre>".to_owned(),
        format!("{:<16} {:>8} {:>7}", "Start", "Ran", "Fuel"),
    ];
    for ep in episodes {
        lines.push(format!(
            "{:<16} {:>8} {:>7.1}",
            local_minute(ep.start_time),
            format_duration(ep.runtime_seconds),
            ep.fuel_used
        ));
    }
    lines.push("</pre>".to_owned());
    lines.join("\n")
}

/// Render refuel events as a `<pre>` table.
pub fn render_refuels(days: i64, events: &[RefuelEvent]) -> String {
    if events.is_empty() {
        return format!("No refuels in the last {days} day(s).");
    }
    let mut lines = vec![
        format!("<b>Refuels, last {days} day(s):</b>"),
        "<pre>".to_owned(),
        format!(
            "{:<16} {:>7} {:>7} {:>7} {}",
            "When", "Added", "Before", "After", "By"
        ),
    ];
    for ev in events {
        let added = match ev.kind() {
            RefuelKind::Add => format!("{:.1}", ev.amount),
            RefuelKind::Reset => "reset".to_owned(),
        };
        let by = ev
            .username
            .as_deref()
            .map(|u| format!("@{u}"))
            .or_else(|| ev.user_id.map(|id| id.to_string()))
            .unwrap_or_else(|| "-".to_owned());
        lines.push(format!(
            "{:<16} {:>7} {:>7.1} {:>7.1} {}",
            local_minute(ev.timestamp),
            added,
            ev.fuel_before,
            ev.fuel_after,
            escape_html(&by)
        ));
    }
    lines.push("</pre>".to_owned());
    lines.join("\n")
}
