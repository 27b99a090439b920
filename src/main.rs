use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use clap::{Parser, Subcommand};
use spade_restore::{
    utils::{load_image, save_image},
    DefaultBackend, Flow, RestorationModel, RestorationModelConfig, RestorationOptions, Result,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Inspect and run the restoration networks.
#[derive(Debug, Parser)]
#[command(name = "spade-restore", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every stack's stages and parameter count
    Summary {
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
    },
    /// Push a zero image through each flow and print the shapes
    Shapes {
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
        /// Square input size in pixels
        #[arg(long, default_value_t = 256)]
        size: usize,
    },
    /// Run the degraded -> clean pipeline on an image
    Restore {
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Weights recorded with burn's named MessagePack recorder
        #[arg(long)]
        weights: Option<PathBuf>,
    },
    /// Write the default pipeline configuration
    InitConfig {
        #[arg(long, default_value = "restoration.json")]
        output: PathBuf,
    },
}

fn default_config() -> RestorationModelConfig {
    RestorationModelConfig::from_options(RestorationOptions::new(), 3)
}

fn load_config(path: Option<&Path>) -> Result<RestorationModelConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            Ok(RestorationModelConfig::load(path)?)
        }
        None => Ok(default_config()),
    }
}

fn init_config(output: &Path) -> Result<()> {
    default_config().save(output)?;
    info!(path = %output.display(), "wrote default config");
    Ok(())
}

fn restore(
    config: &RestorationModelConfig,
    input: &Path,
    output: &Path,
    weights: Option<&Path>,
    device: &Device<DefaultBackend>,
) -> Result<()> {
    let mut model = build(config, device)?;
    if let Some(weights) = weights {
        info!(path = %weights.display(), "loading weights");
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model = model.load_file(weights, &recorder, device)?;
    }

    let image = load_image::<DefaultBackend, _>(input, device)?;
    let [_, _, height, width] = image.dims();
    info!(height, width, "restoring image");

    save_image(model.forward(image), output)?;
    info!(path = %output.display(), "wrote restored image");
    Ok(())
}

fn build(
    config: &RestorationModelConfig,
    device: &Device<DefaultBackend>,
) -> Result<RestorationModel<DefaultBackend>> {
    let model = config.init::<DefaultBackend>(device)?;
    info!(params = model.num_params(), "model ready");
    Ok(model)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device = Default::default();

    match cli.command {
        Command::Summary { config } => {
            let config = load_config(config.as_deref())?;
            let model = build(&config, &device)?;

            let stacks = [
                ("degraded encoder", model.degraded_vae.encoder()),
                ("degraded decoder", model.degraded_vae.decoder()),
                ("mapping", model.mapping.stack()),
                ("clean encoder", model.clean_vae.encoder()),
                ("clean decoder", model.clean_vae.decoder()),
            ];
            for (name, stack) in stacks {
                println!("{name} ({} params)", stack.num_params());
                for (i, stage) in stack.describe().iter().enumerate() {
                    println!("  {i:3}: {stage}");
                }
            }
        }

        Command::Shapes { config, size } => {
            let config = load_config(config.as_deref())?;
            let model = build(&config, &device)?;
            let channels = config.degraded.input_nc;
            let input = Tensor::<DefaultBackend, 4>::zeros([1, channels, size, size], &device);

            for flow in [Flow::Encode, Flow::EncodeDecode] {
                let output = model.degraded_vae.forward(input.clone(), flow);
                println!("{flow:>8}: {:?}", output.dims());
            }
            println!("{:>8}: {:?}", "restore", model.forward(input).dims());
        }

        Command::Restore {
            config,
            input,
            output,
            weights,
        } => {
            let config = load_config(config.as_deref())?;
            restore(&config, &input, &output, weights.as_deref(), &device)?;
        }

        Command::InitConfig { output } => init_config(&output)?,
    }

    Ok(())
}
