//! Static macros expanded before any placeholder handling.
//!
//! `{{date}}`, `{{date+N}}` / `{{date-N}}` and `{{time}}` are replaced with
//! the local calendar date (`YYYY-MM-DD`, shifted by N days) and the local
//! wall-clock time (`HH:MM`). Anything else is left verbatim.

use chrono::{Duration, Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex};
use tracing::debug;

static DATE_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{date(?:([+-][^{}]*))?\}\}").expect("date macro pattern"));
static TIME_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{time\}\}").expect("time macro pattern"));

/// Expands date/time macros against the current local clock.
pub fn expand_static_macros(template: &str) -> String {
    expand_static_macros_at(template, Local::now().naive_local())
}

/// Same as [`expand_static_macros`] with a frozen clock.
pub fn expand_static_macros_at(template: &str, now: NaiveDateTime) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let today = now.date();
    let expanded = DATE_MACRO.replace_all(template, |caps: &Captures| {
        let offset = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0);
        let date = Duration::try_days(offset)
            .and_then(|delta| today.checked_add_signed(delta))
            .unwrap_or(today);
        debug!("Processed dynamic replacement: {} -> {}", &caps[0], date);
        date.format("%Y-%m-%d").to_string()
    });

    let time = now.format("%H:%M").to_string();
    TIME_MACRO
        .replace_all(&expanded, NoExpand(&time))
        .into_owned()
}
