mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use migrago_engine::CreateMode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "migrago", version, about = "File-based SQL migrations for many projects and databases")]
struct Cli {
    /// Path to the configuration file (YAML, or TOML by extension)
    #[arg(short, long, global = true, env = "MIGRAGO_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply all pending migrations
    Up {
        /// Only this project
        #[arg(short, long)]
        project: Option<String>,

        /// Only this database
        #[arg(short, long, visible_alias = "db")]
        database: Option<String>,
    },

    /// Revert the most recent migrations of one project database
    Down {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, visible_alias = "db")]
        database: String,

        /// Number of migrations to revert
        #[arg(short, long, default_value_t = 1)]
        limit: usize,

        /// Also count migrations applied without a down script
        #[arg(long)]
        no_skip: bool,
    },

    /// Show applied migrations, newest first
    List {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, visible_alias = "db")]
        database: String,

        /// Show at most this many migrations
        #[arg(short, long)]
        limit: Option<usize>,

        /// Include migrations applied without a down script
        #[arg(long)]
        no_skip: bool,
    },

    /// Prepare the migration tracking store
    Init,

    /// Create new empty migration files
    Create {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, visible_alias = "db")]
        database: String,

        /// Migration name, appended to the timestamp
        #[arg(short, long)]
        name: String,

        #[arg(short, long, value_enum, default_value_t = ModeArg::Both)]
        mode: ModeArg,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Up,
    Down,
    Both,
}

impl From<ModeArg> for CreateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Up => CreateMode::Up,
            ModeArg::Down => CreateMode::Down,
            ModeArg::Both => CreateMode::Both,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli
        .config
        .ok_or_else(|| anyhow::anyhow!("a configuration file is required (-c <path>)"))?;

    match cli.command {
        Commands::Up { project, database } => commands::up(&config, project, database),
        Commands::Down {
            project,
            database,
            limit,
            no_skip,
        } => commands::down(&config, &project, &database, limit, !no_skip),
        Commands::List {
            project,
            database,
            limit,
            no_skip,
        } => commands::list(&config, &project, &database, limit, !no_skip),
        Commands::Init => commands::init(&config),
        Commands::Create {
            project,
            database,
            name,
            mode,
        } => commands::create(&config, &project, &database, &name, mode.into()),
    }
}
