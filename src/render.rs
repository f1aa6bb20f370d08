//! Fills placeholder directives with values and produces the plain text that
//! gets inserted plus an escaped HTML rendition for previews.

use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::parse::scan_placeholders;
use crate::replacement::expand_static_macros_at;

/// Label → chosen text.
pub type ValueMap = HashMap<String, String>;

static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([,.;:!?])").expect("punctuation pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rendered {
    pub plain: String,
    pub html: String,
}

pub fn render(template: &str, values: &ValueMap, highlight: bool) -> Rendered {
    render_at(template, values, highlight, Local::now().naive_local())
}

/// Renders against a fixed clock so the output is fully determined by the
/// arguments.
pub fn render_at(
    template: &str,
    values: &ValueMap,
    highlight: bool,
    now: NaiveDateTime,
) -> Rendered {
    let expanded = expand_static_macros_at(template, now);

    let mut plain = String::with_capacity(expanded.len());
    let mut html = String::with_capacity(expanded.len() * 2);
    let mut cursor = 0;

    for found in scan_placeholders(&expanded) {
        let literal = &expanded[cursor..found.start];
        plain.push_str(literal);
        html.push_str(&html_escape(literal));

        let label = &found.placeholder.label;
        let value = values.get(label).map(String::as_str).unwrap_or_default();
        plain.push_str(value);
        if highlight {
            html.push_str(&format!(
                r#"<span class="hl" data-label="{}">{}</span>"#,
                html_escape(label),
                html_escape(value)
            ));
        } else {
            html.push_str(&html_escape(value));
        }

        cursor = found.end;
    }

    let tail = &expanded[cursor..];
    plain.push_str(tail);
    html.push_str(&html_escape(tail));

    Rendered {
        plain: tighten_punctuation(&plain),
        html: tighten_punctuation_outside_tags(&html),
    }
}

/// Drops whitespace that ends up directly in front of `, . ; : ! ?`.
pub fn tighten_punctuation(text: &str) -> String {
    SPACE_BEFORE_PUNCT.replace_all(text, "$1").into_owned()
}

fn tighten_punctuation_outside_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&tighten_punctuation(&rest[..open]));
        match rest[open..].find('>') {
            Some(close) => {
                out.push_str(&rest[open..open + close + 1]);
                rest = &rest[open + close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(&tighten_punctuation(rest));

    out
}

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
