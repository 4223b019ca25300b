#[derive(clap::Parser)]
#[command(version, about = "Collegiate baseball roster and season-stats harvester")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Scrape every source that is due this season.
    Run {
        /// Ignore the season gate and re-scrape sources already done this epoch.
        #[arg(short, long)]
        force: bool,
        /// Print the plan and exit without fetching anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Scrape a handful of sources end to end, season gate ignored.
    Sample {
        /// How many sources to take off the top of the plan.
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Per-division coverage against the registry.
    Status,
    /// Re-locate dead or redirecting sources via conference directories.
    Recover {
        /// Compute and log corrections without saving them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch one URL and show what the parsers make of it.
    Probe { url: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    use cscr::{config::Config, db::Db, pipeline};

    pretty_env_logger::init_timed();

    let args = Args::parse();
    let cfg = Config::from_env()?;

    if let Commands::Probe { url } = &args.command {
        return pipeline::probe(&cfg, url).await;
    }

    let db = Db::connect(&cfg).await?;
    let pipeline = pipeline::Pipeline::new(cfg, db)?;

    match args.command {
        Commands::Run { force, dry_run } => {
            pipeline
                .run(pipeline::RunOptions {
                    force,
                    dry_run,
                    limit: None,
                })
                .await
        }
        Commands::Sample { count } => {
            pipeline
                .run(pipeline::RunOptions {
                    force: true,
                    dry_run: false,
                    limit: Some(count),
                })
                .await
        }
        Commands::Status => pipeline.status().await,
        Commands::Recover { dry_run } => pipeline.recover(dry_run).await,
        Commands::Probe { .. } => unreachable!(),
    }
}
