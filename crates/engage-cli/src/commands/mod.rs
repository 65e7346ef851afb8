use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engage_channels::{HttpGenerator, ResponseGenerator};
use engage_config::{ConfigLoader, EngageConfig, WarningSeverity};
use engage_core::{EngageError, Result};
use engage_memory::{ConversationStore, DedupLedger};

mod memory;
mod post;
mod run;
mod stream;

/// Engage: social engagement agent for DMs, mentions and live audio rooms
#[derive(Parser)]
#[command(name = "engage", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to engage.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run engagement cycles over requests, DMs and mentions until Ctrl-C
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Join a live audio room and listen, think and speak until Ctrl-C
    Stream {
        /// Room handle (defaults to stream.space from the config)
        #[arg(short, long)]
        space: Option<String>,
    },
    /// Inspect or clear stored conversations
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Show recently handled signals
    Ledger {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue and list standalone posts
    Post {
        #[command(subcommand)]
        action: PostAction,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check configuration, storage and collaborators
    Doctor,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List known handles
    List,
    /// Show one conversation
    Show {
        handle: String,
        /// Number of recent entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget one conversation, or all of them
    Clear {
        /// Handle to forget (omit with --all)
        #[arg(required_unless_present = "all")]
        handle: Option<String>,
        /// Forget every conversation
        #[arg(long, conflicts_with = "handle")]
        all: bool,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum PostAction {
    /// Queue a post for the next post phase
    Add { text: String },
    /// List queued and published posts
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Run { once } => run::cmd_run(config, config_loader, once).await,
            Commands::Stream { space } => stream::cmd_stream(config, space).await,
            Commands::Memory { action } => memory::cmd_memory(config, action),
            Commands::Ledger { limit, json } => Self::cmd_ledger(config, limit, json),
            Commands::Post { action } => post::cmd_post(config, action),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config, config_loader),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: EngageConfig, json: bool) -> Result<()> {
        let mut shown = config;
        if shown.adapters.generator_api_key.is_some() {
            shown.adapters.generator_api_key = Some("********".into());
        }
        if json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&shown).map_err(|e| EngageError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_ledger(config: EngageConfig, limit: usize, json: bool) -> Result<()> {
        let store = open_store(&config)?;
        let ledger = DedupLedger::new(store);
        let entries = ledger.entries(limit)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }
        if entries.is_empty() {
            println!("No handled signals yet.");
            return Ok(());
        }

        println!("\x1b[1mReply Ledger\x1b[0m ({} of {} entries)", entries.len(), ledger.len());
        println!("{}", "-".repeat(80));
        for entry in &entries {
            println!(
                "\x1b[90m{}\x1b[0m  {:<20}  {}",
                entry.emitted_at.format("%Y-%m-%d %H:%M:%S"),
                entry.handle,
                entry.signal_id
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: EngageConfig, loader: ConfigLoader) -> Result<()> {
        println!("🩺 Engage Doctor");
        println!("   Config: {}", loader.path().display());
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let mut ok = 0;
        let mut fail = 0;

        match open_store(&config) {
            Ok(store) => {
                ok += 1;
                println!(
                    "  ✅ memory: {} ({} conversations)",
                    config.memory.db_path.display(),
                    store.handles().len()
                );
            }
            Err(e) => {
                fail += 1;
                println!("  ❌ memory: {e}");
            }
        }

        if config.adapters.inbox_dir.is_dir() {
            ok += 1;
            println!("  ✅ inbox: {}", config.adapters.inbox_dir.display());
        } else {
            fail += 1;
            println!(
                "  ❌ inbox: {} does not exist (the platform bridge writes here)",
                config.adapters.inbox_dir.display()
            );
        }

        match build_generator(&config) {
            Ok(generator) => {
                ok += 1;
                println!("  ✅ generator: {}", generator.name());
            }
            Err(e) => {
                fail += 1;
                println!("  ❌ generator: {e}");
            }
        }

        println!();
        println!("  ✅ {ok} checks passed, ❌ {fail} failed, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "engage", &mut std::io::stdout());
        Ok(())
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.with_target(false).init(),
    }
}

pub(crate) fn open_store(config: &EngageConfig) -> Result<Arc<ConversationStore>> {
    Ok(Arc::new(ConversationStore::open(&config.memory.db_path)?))
}

pub(crate) fn build_generator(config: &EngageConfig) -> Result<Arc<dyn ResponseGenerator>> {
    let url = config.adapters.generator_url.as_deref().ok_or_else(|| {
        EngageError::Config(
            "adapters.generator_url is not set (or export ENGAGE_GENERATOR_URL)".into(),
        )
    })?;
    let generator = HttpGenerator::new(
        url,
        Duration::from_secs(config.adapters.generator_timeout_secs),
    )?
    .with_api_key(config.adapters.generator_api_key.clone());
    Ok(Arc::new(generator))
}
