use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use vigrate_core::{Direction, EnvConfig, Timeouts, config, create, executor};

#[derive(Parser, Debug)]
#[command(name = "vigrate", version)]
#[command(about = "Vigrate - SQL migration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Seconds to wait for a database connection (0 = no limit)
    #[arg(long, global = true, env = "CONNECT_TIMEOUT", default_value_t = 30)]
    connect_timeout: u64,

    /// Seconds a whole migration run may take (0 = no limit)
    #[arg(long, global = true, env = "TIMEOUT", default_value_t = 0)]
    timeout: u64,

    /// Log line format on stderr
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log more (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Which environment of which config file to use.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct Target {
    /// Migration environment
    #[arg(long, env = "ENV", default_value = "development")]
    env: String,
    /// Migration configuration file
    #[arg(long, env = "CONFIG", default_value = "dbconfig.yml")]
    config: PathBuf,
}

impl Target {
    fn resolve(&self) -> vigrate_core::Result<EnvConfig> {
        config::resolve(&self.config, &self.env)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a migration
    Create {
        /// Name of migration to create
        #[arg(long, env = "NAME", default_value = "something")]
        name: String,
        #[command(flatten)]
        target: Target,
    },
    /// Apply all new migrations
    Up {
        /// Selected schema for migration
        #[arg(long, env = "SCHEMA", default_value = "public")]
        schema: String,
        #[command(flatten)]
        target: Target,
    },
    /// Roll back migrations
    Rollback {
        /// Selected schema for migration
        #[arg(long, env = "SCHEMA", default_value = "public")]
        schema: String,
        /// Number of migrations to roll back (0 = all)
        #[arg(long, env = "STEP", default_value_t = 1)]
        step: usize,
        #[command(flatten)]
        target: Target,
    },
    /// Roll back every applied migration
    Reset {
        /// Selected schema for migration
        #[arg(long, env = "SCHEMA", default_value = "public")]
        schema: String,
        #[command(flatten)]
        target: Target,
    },
    /// Roll back then re-apply migrations
    Refresh {
        /// Selected schema for migration
        #[arg(long, env = "SCHEMA", default_value = "public")]
        schema: String,
        /// Number of migrations to redo (0 = all)
        #[arg(long, env = "STEP", default_value_t = 1)]
        step: usize,
        #[command(flatten)]
        target: Target,
    },
}

impl Cli {
    fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: seconds(self.connect_timeout),
            run: seconds(self.timeout),
        }
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose, cli.quiet);

    match run_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            eprintln!("[ERROR] {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_tracing(format: LogFormat, verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(err) = installed {
        eprintln!("[WARN] logging disabled: {}", err);
    }
}

async fn run_cli(cli: Cli) -> vigrate_core::Result<()> {
    let timeouts = cli.timeouts();

    match cli.command {
        Commands::Create { name, target } => {
            let config = target.resolve()?;
            let path = create::create(&name, &config)?;
            println!("[OK] Created migration: {}", path.display());
        }
        Commands::Up { schema, target } => {
            let config = target.resolve()?;
            let n = executor::execute(&config, &schema, Direction::Up, 0, timeouts).await?;
            println!("[OK] {} migration(s) applied.", n);
        }
        Commands::Rollback {
            schema,
            step,
            target,
        } => {
            let config = target.resolve()?;
            let n = executor::execute(&config, &schema, Direction::Down, step, timeouts).await?;
            println!("[OK] {} migration(s) rolled back.", n);
        }
        Commands::Reset { schema, target } => {
            let config = target.resolve()?;
            let n = executor::execute(&config, &schema, Direction::Down, 0, timeouts).await?;
            println!("[OK] {} migration(s) rolled back.", n);
        }
        Commands::Refresh {
            schema,
            step,
            target,
        } => {
            let config = target.resolve()?;
            let n = executor::execute(&config, &schema, Direction::Down, step, timeouts).await?;
            println!("[OK] {} migration(s) rolled back.", n);
            let n = executor::execute(&config, &schema, Direction::Up, step, timeouts).await?;
            println!("[OK] {} migration(s) applied again.", n);
        }
    }

    Ok(())
}
