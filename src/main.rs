mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use ladle::PackageManager;
use ladle::manifest::ArchitectureKey;
use ladle::platform::detect_architecture;

#[derive(Parser)]
#[command(name = "ladle")]
#[command(author, version, about = "Install apps from scoop buckets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Architecture to install (32bit, 64bit, arm64)
    #[arg(short, long, global = true)]
    arch: Option<ArchitectureKey>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install apps ([bucket/]name[@version])
    Install {
        apps: Vec<String>,
    },

    /// Uninstall apps
    Uninstall {
        apps: Vec<String>,

        /// Also delete older versions and the app directory
        #[arg(long)]
        purge: bool,
    },

    /// Download artifacts into the cache without installing
    Download {
        apps: Vec<String>,

        /// Download again even if a verified copy is cached
        #[arg(short, long)]
        force: bool,
    },

    /// Show the dependency tree of an app
    Depends {
        app: String,

        /// Show apps depending on this one instead
        #[arg(long)]
        reverse: bool,
    },

    /// List installed apps
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show installed apps with newer manifests
    Status,

    /// Pin apps at their installed version
    Hold {
        apps: Vec<String>,
    },

    /// Release held apps
    Unhold {
        apps: Vec<String>,
    },

    /// Print an app's manifest
    Cat {
        app: String,
    },

    /// Show information about an app
    Info {
        app: String,

        #[arg(long)]
        json: bool,
    },

    /// Manage the download cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Manage local buckets
    Bucket {
        #[command(subcommand)]
        command: BucketCommand,
    },

    /// List versions of an app found in its bucket's history
    Versions {
        app: String,

        /// Maximum number of versions
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List cached files, optionally for one app
    Show { app: Option<String> },
    /// Remove cached files of apps
    Rm { apps: Vec<String> },
}

#[derive(Subcommand)]
enum BucketCommand {
    /// Buckets from the registry shipped with scoop
    Known,
    /// Buckets present locally
    List,
    /// Delete a local bucket
    Rm { name: String },
}

/// Honor NO_COLOR and CLICOLOR_FORCE, otherwise color only terminals
fn init_colors() {
    let forced = std::env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0");
    let enabled = if std::env::var_os("NO_COLOR").is_some() {
        false
    } else {
        forced || std::io::IsTerminal::is_terminal(&std::io::stdout())
    };
    colored::control::set_override(enabled);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    init_colors();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ladle", &mut std::io::stdout());
        return Ok(());
    }

    let pm = PackageManager::new()?.with_progress(true);
    let arch = cli.arch.unwrap_or_else(detect_architecture);

    let result = match cli.command {
        Commands::Install { apps } => commands::install::install(&pm, &apps, arch).await,
        Commands::Uninstall { apps, purge } => commands::install::uninstall(&pm, &apps, purge),
        Commands::Download { apps, force } => {
            commands::install::download(&pm, &apps, arch, force).await
        }
        Commands::Depends { app, reverse } => commands::query::depends(&pm, &app, reverse),
        Commands::List { json } => commands::query::list(&pm, json),
        Commands::Status => commands::query::status(&pm),
        Commands::Hold { apps } => commands::maintenance::hold(&pm, &apps, true),
        Commands::Unhold { apps } => commands::maintenance::hold(&pm, &apps, false),
        Commands::Cat { app } => commands::query::cat(&pm, &app),
        Commands::Info { app, json } => commands::query::info(&pm, &app, json),
        Commands::Cache { command } => match command {
            CacheCommand::Show { app } => commands::maintenance::cache_show(&pm, app.as_deref()),
            CacheCommand::Rm { apps } => commands::maintenance::cache_rm(&pm, &apps),
        },
        Commands::Bucket { command } => match command {
            BucketCommand::Known => commands::maintenance::bucket_known(&pm),
            BucketCommand::List => commands::maintenance::bucket_list(&pm),
            BucketCommand::Rm { name } => commands::maintenance::bucket_rm(&pm, &name),
        },
        Commands::Versions { app, limit } => commands::query::versions(&pm, &app, limit),
        Commands::Completions { .. } => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "✗".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
