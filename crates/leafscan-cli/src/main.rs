mod display;
mod serve;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use leafscan_ai::{ModelConfig, Pipeline, load_image};
use leafscan_core::LabelSpace;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "leafscan",
    version,
    about = "Crop species and disease classification for leaf photographs"
)]
struct Cli {
    /// Directory holding the CLIP encoder, both heads and an optional leafscan.json.
    #[arg(long, env = "LEAFSCAN_MODEL_DIR", default_value = "models", global = true)]
    model_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a single image.
    Predict {
        image: PathBuf,
        /// Apply random flips, rotation and colour jitter first.
        #[arg(long)]
        augment: bool,
        /// Seed for --augment, for reproducible runs.
        #[arg(long, requires = "augment")]
        seed: Option<u64>,
        /// Print the diagnosis as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the label maps.
    Labels {
        #[arg(value_enum)]
        space: Option<SpaceArg>,
    },
    /// Serve the prediction API over HTTP.
    Serve {
        #[arg(long, env = "LEAFSCAN_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "LEAFSCAN_PORT", default_value_t = 5000)]
        port: u16,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SpaceArg {
    Crop,
    Disease,
}

impl From<SpaceArg> for LabelSpace {
    fn from(arg: SpaceArg) -> Self {
        match arg {
            SpaceArg::Crop => LabelSpace::Crop,
            SpaceArg::Disease => LabelSpace::Disease,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("leafscan v{}", env!("CARGO_PKG_VERSION"));

    let config = ModelConfig::from_model_dir(&cli.model_dir)
        .with_context(|| format!("reading model directory {}", cli.model_dir.display()))?;

    match cli.command {
        Command::Predict {
            image,
            augment,
            seed,
            json,
        } => predict(&config, &image, augment, seed, json),
        Command::Labels { space } => {
            let spaces = match space {
                Some(space) => vec![space.into()],
                None => vec![LabelSpace::Crop, LabelSpace::Disease],
            };
            for space in spaces {
                print!("{}", display::label_table(&config.label_map(space)?));
            }
            Ok(())
        }
        Command::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid listen address {host}:{port}"))?;
            // Load everything before binding, so no request sees a half-built pipeline.
            let pipeline = Pipeline::load(&config)?;
            serve::serve(Arc::new(pipeline), addr).await
        }
    }
}

fn predict(
    config: &ModelConfig,
    image_path: &Path,
    augment: bool,
    seed: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::load(config)?;
    let image = load_image(image_path)?;

    let diagnosis = if augment {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        pipeline.infer_augmented(&image, &mut rng)?
    } else {
        pipeline.infer(&image)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnosis)?);
    } else {
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_path.display().to_string());
        print!("{}", display::diagnosis_card(&name, &diagnosis, augment));
    }
    Ok(())
}
