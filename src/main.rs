//! slashsnip command line interface
//!
//! Manages the snippet store and runs the expansion pipeline against text
//! given on the command line.

use anyhow::{bail, Context, Result};
use minimo::showln;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use slashsnip::assistant::{read_context, AnalysisRequest, PanelState};
use slashsnip::config::get_config_path;
use slashsnip::expander::split_mail;
use slashsnip::host::{LogNotifier, NoMailFields};
use slashsnip::index::{snippets_from_value, SnippetMap};
use slashsnip::library::{import_library, watch_library};
use slashsnip::parse::parse_placeholders;
use slashsnip::remote::REMOTE_URL_KEY;
use slashsnip::render::ValueMap;
use slashsnip::store::{get_or_default, SNIPPETS_KEY};
use slashsnip::surface::{FieldKind, TextField};
use slashsnip::{
    load_config, render, sync_remote, AnalysisClient, AppConfig, EditEvent, EventOutcome,
    Expander, FileStore, HttpAnalysisClient, Key, KeyValueStore, ShortcutIndex, Surface,
    Template,
};

pub const BANNER: &str = r#"
     __           __                _
 ___/ /__ ____ __/ /  ___ ___  ___ (_)__
(_-/ / _ `(_-</ _ \ (_-</ _ \/ _ \/ / _ \
/___/_/\_,_/___/_//_//___/_//_/_//_/_/ .__/
                                    /_/
"#;

fn display_help() {
    println!("{}", BANNER.trim_matches('\n'));
    println!("\x1b[33;1m┌─\x1b[47m HOW TO USE \x1b[0m\x1b[33;1m──────────\x1b[0m");
    println!("\x1b[33;1m│\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip list \x1b[90m- List stored shortcuts\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip show <shortcut> \x1b[90m- Show a template and its fields\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip render <shortcut> [label=value ...] \x1b[90m- Fill a template\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip expand <text> \x1b[90m- Expand the shortcut at the end of <text>\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip import [file] \x1b[90m- Import a snippet library\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip watch [file] \x1b[90m- Re-import a library whenever it changes\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip sync [url] \x1b[90m- Pull snippets from a remote JSON source\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip analyze <text> \x1b[90m- Send a message to the assistant\x1b[0m");
    println!("\x1b[33;1m│\x1b[36;1m slashsnip config \x1b[90m- Show the configuration\x1b[0m");
    println!("\x1b[33;1m│\x1b[0m");
}

fn open_store(config: &AppConfig) -> Result<Arc<FileStore>> {
    let path = config.store_path()?;
    let store = FileStore::open(&path)
        .with_context(|| format!("Failed to open store {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn load_snippets(store: &dyn KeyValueStore) -> SnippetMap {
    get_or_default(store, SNIPPETS_KEY)
        .await
        .map(|value| snippets_from_value(&value))
        .unwrap_or_default()
}

async fn find_template(store: &dyn KeyValueStore, shortcut: &str) -> Result<Template> {
    let index = ShortcutIndex::build(&load_snippets(store).await);
    Ok(index.require(shortcut)?.clone())
}

fn library_arg(config: &AppConfig, arg: Option<&String>) -> Result<PathBuf> {
    match arg.map(PathBuf::from).or_else(|| config.library_path.clone()) {
        Some(path) => Ok(path),
        None => bail!("No library file given and none configured"),
    }
}

fn joined_args(args: &[String], from: usize) -> Result<String> {
    if args.len() <= from {
        bail!("Missing text argument");
    }
    Ok(args[from..].join(" "))
}

async fn handle_list(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let snippets = load_snippets(store.as_ref()).await;

    showln!(
        yellow_bold,
        "┌─",
        white_bold,
        " SLASHSNIP",
        yellow_bold,
        " ────────────────────────────────────────────────────"
    );
    showln!(yellow_bold, "│ ", green_bold, store.path().display());
    for (shortcut, template) in &snippets {
        let width = 50usize.saturating_sub(shortcut.len()).max(10);
        let trimmed = minimo::text::chop(&template.summary(), width)
            .first()
            .cloned()
            .unwrap_or_default();
        showln!(
            yellow_bold,
            "│ ",
            yellow_bold,
            "▫ ",
            gray_dim,
            shortcut,
            cyan_bold,
            " ⋯→ ",
            white_bold,
            trimmed
        );
    }
    showln!(
        yellow_bold,
        "└───────────────────────────────────────────────────────────────"
    );
    info!("Listed {} shortcuts", snippets.len());
    Ok(())
}

async fn handle_show(config: &AppConfig, shortcut: &str) -> Result<()> {
    let store = open_store(config)?;
    let template = find_template(store.as_ref(), shortcut).await?;

    match &template {
        Template::Text(text) => println!("{}", text),
        Template::Mail(mail) => {
            showln!(yellow_bold, "subject: ", white_bold, mail.subject);
            showln!(yellow_bold, "body:");
            println!("{}", mail.body);
        }
    }

    let fields = parse_placeholders(&template.dialog_source());
    if !fields.is_empty() {
        showln!(gray_dim, "");
        for field in fields {
            let options = if field.options.is_empty() {
                field.fallback_value()
            } else {
                field.options.join(" | ")
            };
            showln!(
                cyan_bold,
                "▫ ",
                gray_dim,
                field.kind,
                gray_dim,
                " ",
                white_bold,
                field.label,
                gray_dim,
                " ",
                options
            );
        }
    }
    Ok(())
}

async fn handle_render(config: &AppConfig, shortcut: &str, assignments: &[String]) -> Result<()> {
    let store = open_store(config)?;
    let template = find_template(store.as_ref(), shortcut).await?;
    let source = template.dialog_source();

    let mut values: ValueMap = parse_placeholders(&source)
        .into_iter()
        .map(|p| {
            let value = p.fallback_value();
            (p.label, value)
        })
        .collect();
    for assignment in assignments {
        let Some((label, value)) = assignment.split_once('=') else {
            bail!("Expected label=value, got {}", assignment);
        };
        values.insert(label.trim().to_string(), value.to_string());
    }

    let rendered = render(&source, &values, false);
    if template.is_mail() {
        let (subject, body) = split_mail(&rendered.plain);
        showln!(yellow_bold, "subject: ", white_bold, subject);
        println!("{}", body);
    } else {
        println!("{}", rendered.plain);
    }
    Ok(())
}

async fn handle_expand(config: &AppConfig, text: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut expander = Expander::new(config.clone(), store, Arc::new(LogNotifier)).await;
    if let Ok(client) = HttpAnalysisClient::from_config(&config.assistant) {
        expander = expander.with_analysis_client(Arc::new(client));
    }

    let mut surface: Surface = TextField::with_value(FieldKind::TextArea, text).into();
    let mut mail = NoMailFields;
    let outcome = expander
        .handle_event(&mut surface, &EditEvent::key_down(Key::Space), &mut mail)
        .await?;

    match outcome {
        EventOutcome::DialogOpened(pending) => {
            let (mut dialog, result, completion) = pending.into_parts();
            for field in dialog.fields() {
                debug!("Using {} = {:?}", field.label, field.value);
            }
            dialog.insert().await;
            completion.apply(result.await, &mut surface, &mut mail)?;
        }
        EventOutcome::AssistantOpened(pending) => {
            let mut panel = pending.run().await;
            if let PanelState::Failed(reason) = panel.state() {
                showln!(orange_bold, "Assistant failed: ", white_bold, reason);
            }
            panel.insert(&mut surface)?;
        }
        EventOutcome::Ignored | EventOutcome::Passed => {
            showln!(gray_dim, "Nothing to expand");
        }
        other => debug!("Expansion finished: {:?}", other),
    }

    println!("{}", surface.text());
    Ok(())
}

async fn handle_import(config: &AppConfig, file: Option<&String>) -> Result<()> {
    let path = library_arg(config, file)?;
    let store = open_store(config)?;
    let count = import_library(&path, store.as_ref()).await?;
    showln!(
        gray_dim,
        "imported ",
        yellow_bold,
        count,
        gray_dim,
        " rules from ",
        green_bold,
        path.display()
    );
    Ok(())
}

async fn handle_watch(config: &AppConfig, file: Option<&String>) -> Result<()> {
    let path = library_arg(config, file)?;
    let store = open_store(config)?;
    import_library(&path, store.as_ref()).await?;

    let watcher = watch_library(&path, store, tokio::runtime::Handle::current())?;
    showln!(
        gray_dim,
        "watching ",
        green_bold,
        watcher.path().display(),
        gray_dim,
        " (ctrl-c to stop)"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    let stopper = tokio::task::spawn_blocking(move || watcher.stop());
    stopper.await.context("Library watcher did not stop cleanly")?;
    info!("Stopped watching {}", path.display());
    Ok(())
}

async fn handle_sync(config: &AppConfig, url: Option<&String>) -> Result<()> {
    let store = open_store(config)?;
    let url = match url {
        Some(url) => url.clone(),
        None => match get_or_default(store.as_ref(), REMOTE_URL_KEY).await {
            Some(serde_json::Value::String(url)) if !url.trim().is_empty() => url,
            _ => config
                .remote
                .url
                .clone()
                .context("No remote URL given, stored or configured")?,
        },
    };

    let report = sync_remote(&url, store.as_ref(), config.remote.timeout()).await?;
    showln!(
        gray_dim,
        "synced ",
        yellow_bold,
        report.snippets,
        gray_dim,
        " snippets and ",
        yellow_bold,
        report.titles,
        gray_dim,
        " titles from ",
        green_bold,
        report.url
    );
    Ok(())
}

async fn handle_analyze(config: &AppConfig, text: &str) -> Result<()> {
    let client = HttpAnalysisClient::from_config(&config.assistant)?;
    let store = open_store(config)?;
    let context = read_context(None, store.as_ref(), &config.assistant.context_keys).await;
    let request = AnalysisRequest::new(text, context, Vec::new(), config.assistant.max_attachments);

    let response = client.analyze(&request).await?;
    let verdict = if response.allowed() { "allowed" } else { "not allowed" };
    showln!(yellow_bold, "verdict: ", white_bold, verdict);
    if !response.detected.is_empty() {
        showln!(yellow_bold, "detected: ", white_bold, response.detected.join(", "));
    }
    match response.improved.as_deref().map(str::trim) {
        Some(improved) if !improved.is_empty() => println!("{}", improved),
        _ => showln!(gray_dim, "No improved text returned"),
    }
    Ok(())
}

fn handle_config(config: &AppConfig) -> Result<()> {
    let path = get_config_path()?;
    showln!(yellow_bold, "│ ", green_bold, path.display());
    let settings: BTreeMap<&str, String> = BTreeMap::from([
        ("store", config.store_path()?.display().to_string()),
        (
            "library",
            config
                .library_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("trigger", config.assistant.trigger_word.clone()),
        ("remote", config.remote.url.clone().unwrap_or_else(|| "-".to_string())),
        (
            "endpoint",
            config.assistant.endpoint.clone().unwrap_or_else(|| "-".to_string()),
        ),
    ]);
    for (name, value) in settings {
        showln!(yellow_bold, "│ ", gray_dim, name, cyan_bold, " ⋯→ ", white_bold, value);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|e| {
                eprintln!("Invalid log_filter {:?}: {}. Using 'info'.", config.log_filter, e);
                EnvFilter::new("info")
            })
        }))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        display_help();
        return Ok(());
    }

    match args[1].as_str() {
        "list" | "ls" => handle_list(&config).await,
        "show" => match args.get(2) {
            Some(shortcut) => handle_show(&config, shortcut).await,
            None => bail!("Usage: slashsnip show <shortcut>"),
        },
        "render" => match args.get(2) {
            Some(shortcut) => handle_render(&config, shortcut, &args[3..]).await,
            None => bail!("Usage: slashsnip render <shortcut> [label=value ...]"),
        },
        "expand" => handle_expand(&config, &joined_args(&args, 2)?).await,
        "import" => handle_import(&config, args.get(2)).await,
        "watch" => handle_watch(&config, args.get(2)).await,
        "sync" => handle_sync(&config, args.get(2)).await,
        "analyze" => handle_analyze(&config, &joined_args(&args, 2)?).await,
        "config" | "settings" => handle_config(&config),
        _ => {
            display_help();
            Ok(())
        }
    }
}
