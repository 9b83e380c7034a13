//! Header Modifier CLI
//!
//! Edits a JSON-file-backed rule set through the same editor protocol the
//! extension popup uses, and runs requests through the enforcement context.

mod file_store;

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use hm_core::editor::DEFAULT_SAVE_DELAY_MS;
use hm_core::host::MemoryStore;
use hm_core::{
    filter, start_enforcement, Config, ConfigStore, Editor, EmptyValuePolicy, EngineOptions,
    Header, HookResponse, MemoryHost, RuleId, RulePatch, SystemClock, STORAGE_KEY,
};

use crate::file_store::FileStore;

#[derive(Parser)]
#[command(name = "hm-cli")]
#[command(about = "Header modifier rule editor and request simulator")]
struct Cli {
    /// Storage file holding the configuration record
    #[arg(short, long, global = true, default_value = "header-modifier.json")]
    store: String,

    /// Debounce window for saves, in milliseconds
    #[arg(long, global = true, default_value_t = DEFAULT_SAVE_DELAY_MS)]
    debounce_ms: u64,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmptyValueArg {
    /// Send a single space for empty values
    Space,
    /// Send empty values as-is
    Empty,
}

impl From<EmptyValueArg> for EmptyValuePolicy {
    fn from(arg: EmptyValueArg) -> Self {
        match arg {
            EmptyValueArg::Space => EmptyValuePolicy::SingleSpace,
            EmptyValueArg::Empty => EmptyValuePolicy::SendEmpty,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configuration record
    Show {
        /// Print the raw persisted JSON
        #[arg(long)]
        json: bool,
    },

    /// Turn header rewriting on
    Enable,

    /// Turn header rewriting off
    Disable,

    /// Set the URL filter regex (empty string matches all URLs)
    Filter {
        pattern: String,
    },

    /// Add a rule
    Add {
        /// Header name
        #[arg(short, long)]
        name: String,

        /// Header value (may be empty)
        #[arg(long, default_value = "")]
        value: String,

        /// Add the rule disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Change a rule's name or value
    Edit {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        value: Option<String>,
    },

    /// Enable or disable a rule
    Toggle {
        id: String,

        /// Disable instead of enable
        #[arg(long)]
        off: bool,
    },

    /// Delete a rule
    Remove {
        id: String,
    },

    /// Replace the record with the built-in default
    Reset,

    /// Validate a URL filter pattern
    CheckFilter {
        pattern: String,
    },

    /// Run a request through the enforcement context and print the result
    Simulate {
        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// What an empty rule value sends
        #[arg(long, value_enum, default_value_t = EmptyValueArg::Space)]
        empty_value: EmptyValueArg,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let store = FileStore::new(&cli.store);
    let delay = cli.debounce_ms;

    match cli.command {
        Commands::Show { json } => cmd_show(&store, json).await,
        Commands::Enable => edit(&store, delay, |editor| editor.set_enabled(true)).await,
        Commands::Disable => edit(&store, delay, |editor| editor.set_enabled(false)).await,
        Commands::Filter { pattern } => cmd_filter(&store, delay, pattern).await,
        Commands::Add {
            name,
            value,
            disabled,
        } => cmd_add(&store, delay, name, value, disabled).await,
        Commands::Edit { id, name, value } => {
            let patch = RulePatch {
                enabled: None,
                name,
                value,
            };
            cmd_update(&store, delay, &id, patch).await
        }
        Commands::Toggle { id, off } => {
            let patch = RulePatch {
                enabled: Some(!off),
                ..RulePatch::default()
            };
            cmd_update(&store, delay, &id, patch).await
        }
        Commands::Remove { id } => cmd_remove(&store, delay, &id).await,
        Commands::Reset => cmd_reset(&store).await,
        Commands::CheckFilter { pattern } => cmd_check_filter(&pattern),
        Commands::Simulate {
            url,
            headers,
            empty_value,
        } => cmd_simulate(&store, &url, &headers, empty_value.into()).await,
    }
}

// =============================================================================
// Editing
// =============================================================================

/// Open an editor session, apply `mutate`, then save once the debounce window
/// has elapsed. Returns whatever `mutate` returned.
async fn edit<T>(
    store: &FileStore,
    delay_ms: u64,
    mutate: impl FnOnce(&mut Editor<SystemClock>) -> T,
) -> Result<T, String> {
    let mut editor = Editor::open(store, SystemClock).await.with_save_delay(delay_ms);
    let result = mutate(&mut editor);

    while let Some(remaining) = editor.ms_until_save() {
        if remaining > 0 {
            tokio::time::sleep(Duration::from_millis(remaining)).await;
        }
        editor
            .flush(store)
            .await
            .map_err(|e| format!("Failed to save '{}': {}", store.path().display(), e))?;
    }

    Ok(result)
}

async fn cmd_filter(store: &FileStore, delay_ms: u64, pattern: String) -> Result<(), String> {
    let status = edit(store, delay_ms, |editor| editor.set_url_regex(pattern)).await?;
    match status {
        Ok(()) => println!("URL filter updated"),
        Err(e) => println!("URL filter saved, but it matches all URLs until fixed. {}", e),
    }
    Ok(())
}

async fn cmd_add(
    store: &FileStore,
    delay_ms: u64,
    name: String,
    value: String,
    disabled: bool,
) -> Result<(), String> {
    let id = edit(store, delay_ms, |editor| {
        let id = editor.add_rule();
        editor.update_rule(
            &id,
            RulePatch {
                enabled: Some(!disabled),
                name: Some(name),
                value: Some(value),
            },
        );
        id
    })
    .await?;
    println!("{}", id);
    Ok(())
}

async fn cmd_update(store: &FileStore, delay_ms: u64, id: &str, patch: RulePatch) -> Result<(), String> {
    let id = RuleId::from(id);
    let found = edit(store, delay_ms, |editor| editor.update_rule(&id, patch)).await?;
    if !found {
        return Err(format!("No rule with id '{}'", id));
    }
    Ok(())
}

async fn cmd_remove(store: &FileStore, delay_ms: u64, id: &str) -> Result<(), String> {
    let id = RuleId::from(id);
    let found = edit(store, delay_ms, |editor| editor.delete_rule(&id)).await?;
    if !found {
        return Err(format!("No rule with id '{}'", id));
    }
    Ok(())
}

async fn cmd_reset(store: &FileStore) -> Result<(), String> {
    let mut editor = Editor::open(store, SystemClock).await;
    editor
        .reset(store)
        .await
        .map_err(|e| format!("Failed to save '{}': {}", store.path().display(), e))?;
    println!("Configuration reset to defaults");
    Ok(())
}

// =============================================================================
// Inspection
// =============================================================================

async fn load_stored(store: &FileStore) -> Result<Option<serde_json::Value>, String> {
    store
        .get(STORAGE_KEY)
        .await
        .map_err(|e| format!("Failed to read '{}': {}", store.path().display(), e))
}

async fn cmd_show(store: &FileStore, json: bool) -> Result<(), String> {
    let config = Config::from_stored(load_stored(store).await?.as_ref());

    if json {
        let text = serde_json::to_string_pretty(&config)
            .map_err(|e| format!("Failed to serialize: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Header modifier: {}", if config.enabled { "enabled" } else { "disabled" });
    if config.url_regex.trim().is_empty() {
        println!("  URL filter:  (all URLs)");
    } else {
        println!("  URL filter:  {}", config.url_regex);
        if let Err(e) = filter::validate(&config.url_regex) {
            println!("               {} (matching all URLs)", e);
        }
    }
    println!("  Rules:       {} ({} active)", config.rules.len(), config.active_rule_count());
    for rule in &config.rules {
        println!(
            "  [{}] {:<24} {}: {:?}",
            if rule.enabled { "x" } else { " " },
            rule.id.as_str(),
            rule.name,
            rule.value
        );
    }
    Ok(())
}

fn cmd_check_filter(pattern: &str) -> Result<(), String> {
    filter::validate(pattern).map_err(|e| e.to_string())?;
    if pattern.trim().is_empty() {
        println!("Empty filter: matches all URLs");
    } else {
        println!("Valid filter");
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<Header, String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("Header '{}' must look like 'Name: value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Header '{}' has an empty name", raw));
    }
    Ok(Header::new(name, value.trim_start()))
}

async fn simulate(
    stored: Option<serde_json::Value>,
    url: &str,
    headers: &[Header],
    empty_value: EmptyValuePolicy,
) -> HookResponse {
    let memory = match stored {
        Some(record) => MemoryStore::with_value(STORAGE_KEY, record),
        None => MemoryStore::default(),
    };
    let host = MemoryHost::new(memory);
    let _state = start_enforcement(&host, EngineOptions { empty_value }).await;
    host.dispatch(url, headers)
}

async fn cmd_simulate(
    store: &FileStore,
    url: &str,
    raw_headers: &[String],
    empty_value: EmptyValuePolicy,
) -> Result<(), String> {
    let headers = raw_headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let stored = load_stored(store).await?;
    let (modified, outgoing) = match simulate(stored, url, &headers, empty_value).await {
        HookResponse::NoChange => (false, headers),
        HookResponse::Replace(next) => (true, next),
    };

    println!("{} {}", if modified { "Modified" } else { "Unmodified" }, url);
    for header in &outgoing {
        println!("  {}: {:?}", header.name, header.value);
    }
    Ok(())
}
