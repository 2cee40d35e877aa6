use alphagen::{
    config::ConfigResolver,
    logger::{self, LogLevel, LogProfile, LoggerConfig},
    AlphaOptions, AlphaThresholds, BackdropModel, EnvConfigResolver, GeminiClient, GeminiConfig,
    ImageServiceClient, PipelineOrchestrator,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "alphagen", version, about = "Generate images with a transparent background")]
struct Cli {
    /// console, dev or prod
    #[arg(long, global = true, default_value = "console")]
    log_profile: LogProfile,

    /// trace, debug, info, warn or error; overrides the profile
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Write log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full base → white → black → alpha pipeline
    Generate {
        prompt: String,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        ratio: Option<String>,
        #[arg(long, value_enum, default_value_t = Backend::Gemini)]
        backend: Backend,
    },
    /// Build the transparent image from an existing white/black pair
    Extract {
        white: PathBuf,
        black: PathBuf,
        output: PathBuf,
        /// Estimate the backdrop colors from the image corners
        #[arg(long)]
        sampled: bool,
        /// Snap near-transparent and near-opaque alpha
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Gemini,
    Bedrock,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_config = LoggerConfig::for_profile(cli.log_profile).with_overrides(
        cli.log_level,
        cli.log_json,
        cli.log_file.clone(),
    );
    if let Err(e) = logger::init_with_config(log_config) {
        eprintln!("{}", e);
    }
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Command::Generate {
            prompt,
            size,
            ratio,
            backend,
        } => generate(&prompt, size.as_deref(), ratio.as_deref(), backend).await,
        Command::Extract {
            white,
            black,
            output,
            sampled,
            cleanup,
        } => {
            let mut options = AlphaOptions::default();
            if sampled {
                options = options.with_backdrop(BackdropModel::sampled());
            }
            if cleanup {
                options = options.with_thresholds(AlphaThresholds::default());
            }
            alphagen::extract_alpha_files(&white, &black, &output, &options).map(|_| output)
        }
    };

    match result {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn generate(
    prompt: &str,
    size: Option<&str>,
    ratio: Option<&str>,
    backend: Backend,
) -> alphagen::Result<PathBuf> {
    let config = EnvConfigResolver.resolve()?;
    logger::log_config_info(&config);

    let client: Box<dyn ImageServiceClient> = match backend {
        Backend::Gemini => Box::new(GeminiClient::new(GeminiConfig::from_env()?)?),
        #[cfg(feature = "bedrock")]
        Backend::Bedrock => Box::new(
            alphagen::BedrockImageClient::new(alphagen::BedrockConfig::from_env()).await?,
        ),
        #[cfg(not(feature = "bedrock"))]
        Backend::Bedrock => {
            return Err(alphagen::PipelineError::ConfigurationError(
                "Bedrock feature not enabled".into(),
            ))
        }
    };

    let orchestrator = PipelineOrchestrator::new(client, config)?;
    orchestrator.produce_transparent_image(prompt, size, ratio).await
}
