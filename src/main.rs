mod format;

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use corpus_graph_ingest::entities::client::EntityServiceClient;
use corpus_graph_ingest::Corpus;

/// cgingest — corpus graph ingestion pipeline
#[derive(Parser)]
#[command(name = "cgingest", about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Project root directory (defaults to current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print version information with logo
    #[arg(long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and ingest source files: parse, link, extract entities, embed
    Ingest(IngestArgs),

    /// Re-run the full pipeline for a single file
    Reindex(ReindexArgs),

    /// Reset crash-interrupted and retryable-error files, then re-ingest
    Recover(RecoverArgs),

    /// Show per-state file counts
    Status(StatusArgs),

    /// Watch source directories for changes and ingest incrementally
    Watch(WatchArgs),

    /// Create a default .corpusgraph config file
    Init(InitArgs),

    /// Show resolved configuration
    Config(ConfigArgs),

    /// Run diagnostic checks on config and the entity extraction service
    Doctor(DoctorArgs),

    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Parser)]
struct IngestArgs {}

#[derive(Parser)]
struct ReindexArgs {
    /// Path to the file, relative to the project root
    path: PathBuf,
}

#[derive(Parser)]
struct RecoverArgs {}

#[derive(Parser)]
struct StatusArgs {}

#[derive(Parser)]
struct WatchArgs {}

#[derive(Parser)]
struct InitArgs {}

#[derive(Parser)]
struct ConfigArgs {}

#[derive(Parser)]
struct DoctorArgs {}

#[derive(Clone, ValueEnum)]
enum ShellType {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Parser)]
struct CompletionsArgs {
    /// Shell to generate completions for
    shell: ShellType,
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cgingest project configuration.
# Uncommented values override the built-in defaults; shell environment
# variables always take priority over this file.

# CGI_EMBEDDING_PROVIDER=mock
# CGI_EMBEDDING_MODEL=text-embedding-3-small
# CGI_EMBEDDING_DIMENSIONS=1536
# CGI_EMBEDDING_BATCH_SIZE=100
# OPENAI_API_KEY=
# OLLAMA_HOST=http://localhost:11434
# CGI_EMBEDDING_ENDPOINT=

# CGI_ENTITY_SERVICE_URL=http://localhost:8008
# CGI_ENTITY_CONFIDENCE_THRESHOLD=0.5
# CGI_ENTITY_CLASSIFY_SAMPLE_CHARS=2000
# CGI_ENTITY_HTTP_BATCH_CAP=100
# CGI_ENTITY_BATCH_NODE_CAP=1000

# CGI_SOURCE_DIRS=.
# CGI_STORE_FILE=.corpusgraph.store
# CGI_IGNORE_PATTERNS=

# CGI_WATCH=true
# CGI_WATCH_DEBOUNCE_MS=500

# CGI_CHUNK_MAX_CHARS=1500
# CGI_CHUNK_MAX_LINES=120
# CGI_CHUNK_OVERLAP_LINES=5
# CGI_CHUNK_MIN_CHARS=8

# CGI_CONCURRENCY_LIMIT=10
# CGI_MAX_RETRIES=3
"#;

/// Spinner shown while a long-running command has no incremental progress
/// to report yet (discovery + parse + link + embed all run before the CLI
/// sees a single result).
fn new_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    bar.set_message("ingesting corpus...");
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar
}

/// Run the main logic, returning Result for error handling. Errors are printed to stderr.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if cli.version {
        format::print_version();
        return Ok(());
    }

    corpus_graph_ingest::logging::init(cli.verbose)?;

    let cwd = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let json = cli.json;

    match cli.command {
        Some(Commands::Ingest(_args)) => {
            let corpus = Corpus::open(&cwd)?;

            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                cancel_clone.cancel();
            });

            let spinner = (!json).then(new_spinner);
            let (discovered, linked) = corpus.ingest().await?;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }

            if json {
                let output = serde_json::json!({
                    "discovered": discovered,
                    "linked": linked,
                });
                serde_json::to_writer_pretty(std::io::stdout(), &output)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_ingest_summary(&discovered, &linked);
            }
        }
        Some(Commands::Reindex(args)) => {
            let corpus = Corpus::open(&cwd)?;
            corpus.reindex(&args.path).await?;

            if json {
                let output = serde_json::json!({"reindexed": args.path});
                serde_json::to_writer_pretty(std::io::stdout(), &output)?;
                writeln!(std::io::stdout())?;
            } else {
                println!("{} reindexed {}", "✓".green(), args.path.display());
            }
        }
        Some(Commands::Recover(_args)) => {
            let corpus = Corpus::open(&cwd)?;
            let report = corpus.recover().await?;

            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &report)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_recover_report(&report);
            }
        }
        Some(Commands::Status(_args)) => {
            let corpus = Corpus::open(&cwd)?;
            let stats = corpus.state_stats().await?;

            if json {
                let stats_by_name: std::collections::HashMap<String, usize> =
                    stats.iter().map(|(s, n)| (s.as_str().to_string(), *n)).collect();
                serde_json::to_writer_pretty(std::io::stdout(), &stats_by_name)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_state_stats(&stats);
            }
        }
        Some(Commands::Watch(_args)) => {
            let corpus = Corpus::open(&cwd)?;

            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                cancel_clone.cancel();
            });

            if json {
                let msg = serde_json::json!({"status": "watching"});
                serde_json::to_writer_pretty(std::io::stdout(), &msg)?;
                writeln!(std::io::stdout())?;
            } else {
                let dirs: Vec<String> = corpus
                    .config()
                    .source_dirs
                    .iter()
                    .map(|d| d.to_string_lossy().to_string())
                    .collect();
                format::print_watch_started(&dirs);
            }

            corpus.watch(cancel).await?;
        }
        Some(Commands::Init(_args)) => {
            let config_path = cwd.join(".corpusgraph");
            std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;
            format::print_init_success(&config_path.display().to_string());
        }
        Some(Commands::Config(_args)) => {
            let config = corpus_graph_ingest::Config::load(&cwd)?;

            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &config)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_config(&config);
            }
        }
        Some(Commands::Doctor(_args)) => {
            let config = corpus_graph_ingest::Config::load(&cwd)?;

            println!("\n  {} {}\n", "●".cyan().bold(), "Diagnostics".bold());
            println!("  {} configuration loaded and validated", "✓".green());

            match EntityServiceClient::new(config.entity_service_endpoint.clone()) {
                Ok(client) => match client.health().await {
                    Ok(health) => println!(
                        "  {} entity service reachable ({})",
                        "✓".green(),
                        health.status
                    ),
                    Err(e) => println!("  {} entity service unreachable: {e}", "✗".yellow()),
                },
                Err(e) => println!("  {} could not build entity service client: {e}", "✗".yellow()),
            }

            let store_path = if config.store_file.is_absolute() {
                config.store_file.clone()
            } else {
                cwd.join(&config.store_file)
            };
            if store_path.exists() {
                println!("  {} graph store present at {}", "✓".green(), store_path.display());
            } else {
                println!("  {} no graph store yet at {} (first ingest will create it)", "○".dimmed(), store_path.display());
            }
            println!();
        }
        Some(Commands::Completions(args)) => {
            let script = match args.shell {
                ShellType::Bash => {
                    r#"# cgingest bash completions
_cgingest() {
    local cur commands
    COMPREPLY=()
    cur="${COMP_WORDS[COMP_CWORD]}"
    commands="ingest reindex recover status watch init config doctor completions"

    if [ "$COMP_CWORD" -eq 1 ]; then
        COMPREPLY=($(compgen -W "$commands --help --version --verbose --root" -- "$cur"))
    fi
}
complete -F _cgingest cgingest"#
                }
                ShellType::Zsh => {
                    r#"#compdef cgingest
_cgingest() {
    local -a commands
    commands=(
        'ingest:Discover and ingest source files'
        'reindex:Re-run the full pipeline for a single file'
        'recover:Reset crash-interrupted and retryable-error files'
        'status:Show per-state file counts'
        'watch:Watch source directories for changes'
        'init:Create a default .corpusgraph config file'
        'config:Show resolved configuration'
        'doctor:Run diagnostic checks'
    )
    _describe 'command' commands
}
_cgingest"#
                }
                ShellType::Fish => {
                    r#"# cgingest fish completions
complete -c cgingest -n '__fish_use_subcommand' -a ingest -d 'Discover and ingest source files'
complete -c cgingest -n '__fish_use_subcommand' -a reindex -d 'Re-run the full pipeline for a single file'
complete -c cgingest -n '__fish_use_subcommand' -a recover -d 'Reset crash-interrupted and retryable-error files'
complete -c cgingest -n '__fish_use_subcommand' -a status -d 'Show per-state file counts'
complete -c cgingest -n '__fish_use_subcommand' -a watch -d 'Watch source directories for changes'
complete -c cgingest -n '__fish_use_subcommand' -a init -d 'Create a default .corpusgraph config file'
complete -c cgingest -n '__fish_use_subcommand' -a config -d 'Show resolved configuration'
complete -c cgingest -n '__fish_use_subcommand' -a doctor -d 'Run diagnostic checks'"#
                }
                ShellType::PowerShell => {
                    r#"# cgingest PowerShell completions
Register-ArgumentCompleter -CommandName cgingest -ScriptBlock {
    param($wordToComplete, $commandAst, $cursorPosition)
    $commands = @('ingest', 'reindex', 'recover', 'status', 'watch', 'init', 'config', 'doctor')
    $commands | Where-Object { $_ -like "$wordToComplete*" } | ForEach-Object {
        [System.Management.Automation.CompletionResult]::new($_, $_, 'ParameterValue', $_)
    }
}"#
                }
            };
            write!(std::io::stdout(), "{}", script)?;
            writeln!(std::io::stdout())?;
        }
        None => {
            format::print_logo();
            println!("{}", "  Run `cgingest --help` for usage information.".dimmed());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}
