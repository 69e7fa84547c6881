use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::FaceImage;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod config;
mod engine;
mod output;

use config::Config;
use engine::Engine;
use output::{IdentitySummary, Report, StatusReport};

#[derive(Parser)]
#[command(name = "facematch", version, about = "Enroll faces and match them against enrolled identities")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or re-enroll) a named identity from a face photo
    Enroll {
        /// Display name; enrolling an existing name replaces it
        #[arg(short, long)]
        name: String,
        /// Public profile handle
        #[arg(long)]
        handle: String,
        /// Image file containing the face
        image: PathBuf,
    },
    /// List every enrolled identity within tolerance of the face
    Match {
        image: PathBuf,
    },
    /// Show the single closest enrolled identity and its similarity
    Best {
        image: PathBuf,
    },
    /// Remove an enrolled identity
    Delete {
        name: String,
    },
    /// List enrolled identities
    List,
    /// Show one enrolled identity
    Show {
        name: String,
    },
    /// Show models, database and enrolled count
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration loaded");

    let engine = Engine::open(&config).context("starting facematch engine")?;

    let report = match cli.command {
        Commands::Enroll { name, handle, image } => {
            let outcome = engine.enroll(name, load_image(&image)?, handle).await?;
            Report::from_outcome(outcome, |name| Report::Enrolled { name })
        }
        Commands::Match { image } => {
            let outcome = engine.match_threshold(load_image(&image)?).await?;
            Report::from_outcome(outcome, |matches| Report::Matches { matches })
        }
        Commands::Best { image } => {
            let outcome = engine.match_best(load_image(&image)?).await?;
            Report::from_outcome(outcome, Report::best)
        }
        Commands::Delete { name } => {
            engine.delete(name.clone()).await?;
            Report::Deleted { name }
        }
        Commands::List => Report::Identities {
            identities: engine.list().await?.into_iter().map(IdentitySummary::from).collect(),
        },
        Commands::Show { name } => Report::from_outcome(engine.get(name).await?, |record| Report::Identity {
            identity: record.into(),
        }),
        Commands::Status => Report::Status(StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            scrfd_model: config.scrfd_model_path(),
            arcface_model: config.arcface_model_path(),
            db_path: config.db_path.clone(),
            enrolled: engine.enrolled_count()?,
        }),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    Ok(if report.is_positive() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn load_image(path: &Path) -> Result<FaceImage> {
    FaceImage::open(path).with_context(|| format!("reading image {}", path.display()))
}
