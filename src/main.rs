//! swresample-stream
//!
//! Resamples raw or WAV PCM from a file (or stdin) into raw PCM of the
//! configured destination format.

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swresample_stream::error::{ResampleError, Result};
use swresample_stream::{
    pipeline, AudioFormat, RawSource, ResampleConfig, ResampleStream, SwrEngine, WavSource,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "swresample-stream";

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about = "Resample PCM audio with libswresample")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source format as JSON, e.g. '{"format":"s16","rate":44100,"channels":2}'
    #[arg(long)]
    source: Option<String>,

    /// Destination format as JSON
    #[arg(long)]
    destination: Option<String>,

    /// Bytes read from the input per write
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Input is a RIFF/WAVE file; its header supplies the source format
    #[arg(long)]
    wav: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Input file, or '-' for stdin
    input: Option<PathBuf>,

    /// Output file, or '-' for stdout
    output: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut ResampleConfig) -> Result<()> {
        if let Some(source) = self.source.as_deref() {
            config.stream.source = Some(AudioFormat::from_json(source)?);
        }
        if let Some(destination) = self.destination.as_deref() {
            config.stream.destination = Some(AudioFormat::from_json(destination)?);
        }
        if let Some(chunk_size) = self.chunk_size {
            config.stream.chunk_size = chunk_size;
        }
        if self.wav {
            config.stream.wav_input = true;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => ResampleConfig::from_file(path)?,
        None => ResampleConfig::default(),
    };
    args.apply(&mut config)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    swresample_stream::init()?;

    let (Some(input), Some(output)) = (args.input.as_ref(), args.output.as_ref()) else {
        return Err(ResampleError::Config(
            "both INPUT and OUTPUT are required".to_string(),
        ));
    };

    let stream = ResampleStream::new(SwrEngine::new(), config.stream_options())?;
    let reader = open_input(input).await?;
    let writer = open_output(output).await?;
    let chunk_size = config.stream.chunk_size;

    let stats = if config.stream.wav_input {
        let source = WavSource::open(reader, chunk_size).await?;
        tracing::info!(format = %source.format(), "reading WAV input");
        pipeline::run(source, writer, stream).await?
    } else {
        pipeline::run(RawSource::new(reader, chunk_size), writer, stream).await?
    };

    tracing::info!(
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        "done"
    );
    Ok(())
}

async fn open_input(path: &Path) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(tokio::io::BufReader::new(file)))
}

async fn open_output(path: &Path) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(tokio::io::stdout()));
    }
    let file = tokio::fs::File::create(path).await?;
    Ok(Box::new(tokio::io::BufWriter::new(file)))
}

/// Initialize logging with tracing. Logs go to stderr so stdout can carry
/// audio.
fn init_logging(config: &ResampleConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_directive().into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
