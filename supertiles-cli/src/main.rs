//! Point d'entrée CLI pour supertiles

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Variables depuis `$SUPERTILES_ENV`, sinon depuis `.env` s'il existe
fn load_env() {
    let loaded = match std::env::var_os("SUPERTILES_ENV") {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    if let Err(e) = loaded {
        if !e.not_found() {
            eprintln!("warning: environment file ignored: {}", e);
        }
    }
}

mod cli;

use cli::{Commands, RunArgs};

/// Construire des supertiles depuis une FeatureCollection GeoJSON
#[derive(Parser)]
#[command(name = "supertiles")]
#[command(author, version)]
#[command(about = "Build supertile mosaics around GeoJSON features")]
#[command(long_about = "Computes the map tiles covering a square metric buffer around each feature, downloads them from an XYZ tile service and stitches them into one mosaic per feature.\n\nBy default runs the full pipeline. Use 'coverage' to compute tile coverage only.")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Sous-commande (défaut: run)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments de la commande run (commande par défaut)
    #[command(flatten)]
    run: Option<RunArgs>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Run(args)) => run(args).await?,
        Some(Commands::Coverage(args)) => {
            info!(input = %args.geojson_file, zoom = args.zoom, "Coverage only");
            cli::cmd_coverage(args).await?;
        }
        None => {
            let Some(args) = cli.run else {
                anyhow::bail!("Missing --geojson-file (see --help)");
            };
            run(args).await?;
        }
    }

    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    info!(
        input = %args.coverage.geojson_file,
        zoom = args.coverage.zoom,
        "Building supertiles"
    );
    cli::cmd_run(args).await
}

/// `RUST_LOG` remplace le filtre dérivé de -v/-q
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (_, 0) => "info",
        (_, 1) => "debug",
        (_, _) => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,supertiles={level},supertiles_cli={level}"))
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .init();
}
