use clap::{Parser, Subcommand};
use search_provider::cli::{self as prog_cli, OutputMode};
use search_provider::config::ProviderConfig;
use search_provider::errors::ProviderError;
use search_provider::{MemoryDatabase, MemoryLists, logger};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "search-provider", version, about = "Live search lists over a JSON store", long_about = None)]
struct Cli {
    /// Path to a config file (TOML)
    #[arg(long, help = "Path to a config file (TOML). If omitted, ./search-provider.toml is used when present.")]
    config: Option<PathBuf>,
    #[arg(long, help = "List name prefix that marks a subscription as a search")]
    prefix: Option<String>,
    #[arg(long, help = "Record field published as list entries")]
    primary_key: Option<String>,
    #[arg(long, help = "error|warn|info|debug|trace")]
    log_level: Option<String>,
    #[arg(long, help = "Write rolling log files here instead of stderr")]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a provider over in-memory stores, reading commands from stdin")]
    Shell {
        #[arg(long = "seed", help = "Preload a table from NDJSON: table=file.ndjson (repeatable)")]
        seeds: Vec<String>,
        #[arg(long, help = "Print lists and sessions as JSON lines")]
        json: bool,
    },
    #[command(about = "Print the descriptor and plan for a subscription name")]
    Parse {
        #[arg(help = "Subscription name, e.g. search?{\"table\":\"books\",\"query\":[]}")]
        name: String,
    },
    #[command(about = "Print the effective configuration as TOML")]
    Config,
}

fn load_config(cli: &Cli) -> Result<ProviderConfig, ProviderError> {
    // Precedence: CLI > env > config file > defaults
    let mut cfg = ProviderConfig::load(cli.config.as_deref())?;
    if let Some(p) = &cli.prefix {
        cfg.list_prefix = p.clone();
    }
    if let Some(k) = &cli.primary_key {
        cfg.primary_key = k.clone();
    }
    if let Some(l) = &cli.log_level {
        cfg.log_level = l.clone();
    }
    if cli.log_dir.is_some() {
        cfg.log_dir = cli.log_dir.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn shell(cfg: ProviderConfig, seeds: &[String], json: bool) -> Result<(), ProviderError> {
    let level = Some(cfg.log_level.as_str());
    match &cfg.log_dir {
        Some(dir) => logger::configure_logging(Some(dir.as_path()), level, None)?,
        None => logger::configure_console(level)?,
    }
    let database = Arc::new(MemoryDatabase::new(cfg.primary_key.clone()));
    for seed in seeds {
        let (table, path) = prog_cli::parse_seed(seed)?;
        let file = std::fs::File::open(&path)?;
        let n = database.load_ndjson(&table, std::io::BufReader::new(file))?;
        eprintln!("seeded {table} with {n} records from {}", path.display());
    }
    let mode = if json { OutputMode::Json } else { OutputMode::Human };
    eprintln!("Type 'help' for commands. 'quit' to exit.");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    prog_cli::run_shell(cfg, database, MemoryLists::new(), mode, stdin, &mut stdout).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let r = match load_config(&cli) {
        Err(e) => Err(e),
        Ok(cfg) => match &cli.command {
            Commands::Shell { seeds, json } => shell(cfg, seeds, *json).await,
            Commands::Parse { name } => {
                prog_cli::describe(name, &cfg.primary_key).map(|text| println!("{text}"))
            }
            Commands::Config => toml::to_string_pretty(&cfg)
                .map(|text| print!("{text}"))
                .map_err(|e| ProviderError::Config(e.to_string())),
        },
    };
    if let Err(e) = r {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
