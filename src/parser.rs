use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::warn;

use crate::errors::ConfigError;
use crate::index::{MailTemplate, Template};

#[derive(Parser)]
#[grammar = "library.pest"]
struct LibraryParser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRule {
    pub shortcut: String,
    pub template: Template,
}

pub type ParseError = pest::error::Error<Rule>;

/// Rules in file order; a rule listing several triggers yields one entry
/// per trigger.
pub fn parse_library(input: &str) -> Result<Vec<LibraryRule>, ConfigError> {
    let mut rules = Vec::new();

    let pairs = LibraryParser::parse(Rule::file, input)?;
    for pair in pairs.flat_map(|file| file.into_inner()) {
        match pair.as_rule() {
            Rule::rule => match parse_rule(pair) {
                Some((triggers, template)) => {
                    rules.extend(triggers.into_iter().map(|shortcut| LibraryRule {
                        shortcut,
                        template: template.clone(),
                    }));
                }
                None => warn!("Skipping malformed library rule"),
            },
            Rule::EOI => {}
            other => warn!("Unexpected library element: {:?}", other),
        }
    }

    Ok(rules)
}

fn parse_rule(pair: Pair<Rule>) -> Option<(Vec<String>, Template)> {
    let mut inner = pair.into_inner();
    let triggers = inner
        .next()?
        .into_inner()
        .map(|trigger| trigger.as_str().to_string())
        .collect();
    let template = parse_replacement(inner.next()?)?;
    Some((triggers, template))
}

fn parse_replacement(pair: Pair<Rule>) -> Option<Template> {
    let inner = pair.into_inner().next()?;
    match inner.as_rule() {
        Rule::simple => Some(Template::Text(inner.as_str().trim_end().to_string())),
        Rule::multiline => Some(Template::Text(body_of(inner)?)),
        Rule::mail => {
            let mut parts = inner.into_inner();
            let subject = body_of(parts.next()?)?;
            let body = body_of(parts.next()?)?;
            Some(Template::Mail(MailTemplate { subject, body }))
        }
        _ => None,
    }
}

fn body_of(pair: Pair<Rule>) -> Option<String> {
    pair.into_inner().next().map(|text| text.as_str().to_string())
}

/// Writes rules back in library syntax. Text containing a backtick cannot
/// be quoted and is only kept when it fits on one line.
pub fn serialize_library(rules: &[LibraryRule]) -> String {
    let mut output = String::new();

    for rule in rules {
        let replacement = match &rule.template {
            Template::Text(text) if is_simple(text) => text.clone(),
            Template::Text(text) if !text.contains('`') => format!("`{text}`"),
            Template::Mail(mail) if !mail.subject.contains('`') && !mail.body.contains('`') => {
                format!("mail {{ subject: `{}` body: `{}` }}", mail.subject, mail.body)
            }
            _ => {
                warn!("Cannot write {} in library syntax", rule.shortcut);
                continue;
            }
        };
        output.push_str(&format!("{} => {}\n", rule.shortcut, replacement));
    }

    output
}

fn is_simple(text: &str) -> bool {
    !text.is_empty()
        && !text.contains('\n')
        && !text.contains('\r')
        && !text.starts_with('`')
        && !text.starts_with("mail")
        && !text.starts_with(char::is_whitespace)
        && text.trim_end() == text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Template {
        Template::Text(s.to_string())
    }

    #[test]
    fn test_parse_simple_rule() {
        let rules = parse_library("/ack => Thanks, we received your message.\n")
            .expect("Failed to parse simple rule");

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].shortcut, "/ack");
        assert_eq!(rules[0].template, text("Thanks, we received your message."));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let input = "// greetings\n\n/hi => Hello!   \n  // trailing note\n/bye=>Bye";
        let rules = parse_library(input).expect("Failed to parse commented file");

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].template, text("Hello!"));
        assert_eq!(rules[1].shortcut, "/bye");
        assert_eq!(rules[1].template, text("Bye"));
    }

    #[test]
    fn test_parse_multiple_triggers() {
        let rules = parse_library("/ty | /thanks => Thank you\n").expect("Failed to parse triggers");

        let shortcuts: Vec<_> = rules.iter().map(|r| r.shortcut.as_str()).collect();
        assert_eq!(shortcuts, vec!["/ty", "/thanks"]);
        assert!(rules.iter().all(|r| r.template == text("Thank you")));
    }

    #[test]
    fn test_parse_multiline_replacement() {
        let input = "/multi => `line one\nline {{input:Two}}`\n";
        let rules = parse_library(input).expect("Failed to parse multiline replacement");

        assert_eq!(rules[0].template, text("line one\nline {{input:Two}}"));
    }

    #[test]
    fn test_parse_mail_replacement() {
        let input = "/mail => mail {\n  subject: `Case {{input:Case}}`\n  body: `Hello {{input:Name}}`\n}\n";
        let rules = parse_library(input).expect("Failed to parse mail replacement");

        assert_eq!(
            rules[0].template,
            Template::Mail(MailTemplate {
                subject: "Case {{input:Case}}".to_string(),
                body: "Hello {{input:Name}}".to_string(),
            })
        );
    }

    #[test]
    fn test_text_starting_with_mail_is_simple() {
        let rules = parse_library("/box => mailbox is full\n").unwrap();
        assert_eq!(rules[0].template, text("mailbox is full"));
    }

    #[test]
    fn test_rejects_trigger_without_slash() {
        assert!(matches!(parse_library("btw => by the way\n"), Err(ConfigError::Library(_))));
        assert!(matches!(parse_library("/ => nothing\n"), Err(ConfigError::Library(_))));
    }

    #[test]
    fn test_serialized_library_parses_back() {
        let rules = vec![
            LibraryRule { shortcut: "/a".into(), template: text("plain") },
            LibraryRule { shortcut: "/b".into(), template: text("two\nlines") },
            LibraryRule {
                shortcut: "/c".into(),
                template: Template::Mail(MailTemplate { subject: "S".into(), body: "B\nB".into() }),
            },
            LibraryRule { shortcut: "/d".into(), template: text("has ` tick\nand newline") },
        ];

        let written = serialize_library(&rules);
        assert_eq!(parse_library(&written).unwrap(), rules[..3].to_vec());
    }
}
