use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{map, opt},
    error::{context, VerboseError},
    sequence::{delimited, pair, preceded, separated_pair},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    Select,
    Input,
}

impl fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderKind::Select => write!(f, "select"),
            PlaceholderKind::Input => write!(f, "input"),
        }
    }
}

/// A `{{select:...}}` or `{{input:...}}` directive found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    /// Trimmed label; doubles as the key of the value map.
    pub label: String,
    /// Trimmed, non-empty options. Always empty for inputs.
    pub options: Vec<String>,
    /// Default text of an input, if the directive had a `|` part.
    pub default: Option<String>,
    /// Exact directive text, braces included.
    pub raw: String,
}

impl Placeholder {
    /// Value shown when nothing was remembered for this field.
    pub fn fallback_value(&self) -> String {
        match self.kind {
            PlaceholderKind::Select => self.options.first().cloned().unwrap_or_default(),
            PlaceholderKind::Input => self.default.clone().unwrap_or_default(),
        }
    }
}

/// One directive occurrence with its byte span in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMatch {
    pub start: usize,
    pub end: usize,
    pub placeholder: Placeholder,
}

/// Cheap marker check: does the template ask for user input at all?
pub fn has_placeholders(template: &str) -> bool {
    template.contains("{{select:") || template.contains("{{input:")
}

/// Every well-formed directive in textual order, duplicates included.
/// Malformed `{{...` fragments are skipped and stay literal text.
pub fn scan_placeholders(template: &str) -> Vec<PlaceholderMatch> {
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(rel) = template[pos..].find("{{") {
        let start = pos + rel;
        match parse_placeholder(&template[start..]) {
            Ok((rest, placeholder)) => {
                let end = template.len() - rest.len();
                found.push(PlaceholderMatch {
                    start,
                    end,
                    placeholder,
                });
                pos = end;
            }
            Err(e) => {
                trace!("Skipping non-placeholder braces at {}: {:?}", start, e);
                pos = start + 1;
            }
        }
    }

    found
}

/// Directives in first-occurrence order, deduplicated on `(kind, label)`.
pub fn parse_placeholders(template: &str) -> Vec<Placeholder> {
    let mut seen = HashSet::new();
    scan_placeholders(template)
        .into_iter()
        .map(|m| m.placeholder)
        .filter(|p| seen.insert((p.kind, p.label.clone())))
        .collect()
}

enum Body<'a> {
    Select { label: &'a str, options: &'a str },
    Input { label: &'a str, default: Option<&'a str> },
}

fn parse_placeholder(input: &str) -> IResult<&str, Placeholder, VerboseError<&str>> {
    let (rest, body) = context(
        "placeholder",
        delimited(tag("{{"), alt((parse_select, parse_input)), tag("}}")),
    )(input)?;
    let raw = input[..input.len() - rest.len()].to_string();

    let placeholder = match body {
        Body::Select { label, options } => Placeholder {
            kind: PlaceholderKind::Select,
            label: label.trim().to_string(),
            options: options
                .split('|')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            default: None,
            raw,
        },
        Body::Input { label, default } => Placeholder {
            kind: PlaceholderKind::Input,
            label: label.trim().to_string(),
            options: Vec::new(),
            default: default.map(|d| d.trim().to_string()),
            raw,
        },
    };

    Ok((rest, placeholder))
}

fn parse_label(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    context("label", take_while1(|c: char| c != '}' && c != '|'))(input)
}

fn parse_select(input: &str) -> IResult<&str, Body<'_>, VerboseError<&str>> {
    context(
        "select",
        map(
            preceded(
                tag("select:"),
                separated_pair(parse_label, char('|'), take_while1(|c: char| c != '}')),
            ),
            |(label, options)| Body::Select { label, options },
        ),
    )(input)
}

fn parse_input(input: &str) -> IResult<&str, Body<'_>, VerboseError<&str>> {
    context(
        "input",
        map(
            preceded(
                tag("input:"),
                pair(
                    parse_label,
                    opt(preceded(char('|'), take_while(|c: char| c != '}'))),
                ),
            ),
            |(label, default)| Body::Input { label, default },
        ),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_and_input() {
        let tokens = parse_placeholders("{{select:Label|A|B}} and {{input:Name|default}}");
        assert_eq!(tokens.len(), 2);

        assert_eq!(tokens[0].kind, PlaceholderKind::Select);
        assert_eq!(tokens[0].label, "Label");
        assert_eq!(tokens[0].options, vec!["A", "B"]);
        assert_eq!(tokens[0].raw, "{{select:Label|A|B}}");

        assert_eq!(tokens[1].kind, PlaceholderKind::Input);
        assert_eq!(tokens[1].label, "Name");
        assert_eq!(tokens[1].default.as_deref(), Some("default"));
    }

    #[test]
    fn test_trims_labels_and_drops_empty_options() {
        let tokens = parse_placeholders("{{select: Tone | warm || formal }}");
        assert_eq!(tokens[0].label, "Tone");
        assert_eq!(tokens[0].options, vec!["warm", "formal"]);
        assert_eq!(tokens[0].fallback_value(), "warm");
    }

    #[test]
    fn test_input_without_default() {
        let tokens = parse_placeholders("Hi {{input:Name}}!");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].default, None);
        assert_eq!(tokens[0].fallback_value(), "");

        let empty = parse_placeholders("{{input:Name|}}");
        assert_eq!(empty[0].default.as_deref(), Some(""));
    }

    #[test]
    fn test_dedupes_on_kind_and_label() {
        let tokens = parse_placeholders(
            "{{input:Name|x}} {{input:Name|y}} {{select:Name|a|b}} {{input:Name}}",
        );
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].default.as_deref(), Some("x"));
        assert_eq!(tokens[1].kind, PlaceholderKind::Select);
    }

    #[test]
    fn test_malformed_directives_are_not_tokens() {
        assert!(parse_placeholders("{{select:Label}}").is_empty());
        assert!(parse_placeholders("{{input:}}").is_empty());
        assert!(parse_placeholders("{{input:Name").is_empty());
        assert!(parse_placeholders("{{date}} {{time}}").is_empty());
    }

    #[test]
    fn test_scan_reports_spans_and_recovers() {
        let text = "{{{input:a}} {{select:b|x}}";
        let found = scan_placeholders(text);
        assert_eq!(found.len(), 2);
        assert_eq!(&text[found[0].start..found[0].end], "{{input:a}}");
        assert_eq!(&text[found[1].start..found[1].end], "{{select:b|x}}");
    }

    #[test]
    fn test_has_placeholders_is_a_marker_check() {
        assert!(has_placeholders("x {{input:A}}"));
        assert!(has_placeholders("{{select:broken}}"));
        assert!(!has_placeholders("plain {{date}}"));
    }
}
