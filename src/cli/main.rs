//! Watermark removal CLI
//!
//! `probe` inspects a video and optionally saves the preview frame;
//! `process` runs the full pipeline on one file, polling the session for
//! progress the way an HTTP caller would.

use crate::{
    tracing_config::init_cli_tracing, EngineType, FfmpegVideoBackend, MediaProbe, Region,
    RemovalConfig, SessionState, WatermarkRemover,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Video watermark removal tool
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "wmremove")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a video file and print its metadata
    Probe {
        /// Input video file
        input: PathBuf,

        /// Save the first frame as a preview JPEG
        #[arg(long, value_name = "PATH")]
        preview: Option<PathBuf>,

        /// Print metadata as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a watermark region from a video
    Process {
        /// Input video file
        input: PathBuf,

        /// Output video file
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,

        /// Watermark rectangle in source pixels
        #[arg(long, num_args = 4, value_names = ["X", "Y", "WIDTH", "HEIGHT"], allow_negative_numbers = true)]
        region: Vec<i64>,

        /// Path to an ONNX inpainting model; without it the diffusion
        /// fallback is used
        #[arg(short, long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// H.264 constant rate factor (0-51)
        #[arg(long, default_value_t = 23)]
        crf: u8,

        /// x264 preset
        #[arg(long, default_value = "medium")]
        preset: String,

        /// Drop the source audio track from the output
        #[arg(long)]
        no_audio: bool,
    },
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    match cli.command {
        Commands::Probe {
            input,
            preview,
            json,
        } => probe_command(&input, preview.as_deref(), json).await,
        Commands::Process {
            input,
            output,
            region,
            model,
            crf,
            preset,
            no_audio,
        } => {
            let [x, y, width, height]: [i64; 4] = region
                .try_into()
                .map_err(|_| anyhow::anyhow!("--region takes exactly four integers"))?;
            process_command(ProcessArgs {
                input,
                output,
                region: Region::new(x, y, width, height),
                model,
                crf,
                preset,
                preserve_audio: !no_audio,
            })
            .await
        },
    }
}

async fn probe_command(
    input: &std::path::Path,
    preview: Option<&std::path::Path>,
    json: bool,
) -> Result<()> {
    let backend = Arc::new(FfmpegVideoBackend::new()?);
    let probe = MediaProbe::new(backend);

    let metadata = probe.probe(input).await?;
    if json {
        let payload = serde_json::json!({
            "file": input.display().to_string(),
            "format": metadata.format.extension(),
            "codec": metadata.codec,
            "width": metadata.width,
            "height": metadata.height,
            "fps": metadata.fps,
            "duration": metadata.duration,
            "total_frames": metadata.total_frames,
            "has_audio": metadata.has_audio,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        if let Some(preview_path) = preview {
            probe.save_preview(input, preview_path).await?;
        }
        return Ok(());
    }

    println!("File:        {}", input.display());
    println!("Format:      {} ({})", metadata.format.extension(), metadata.codec);
    println!("Resolution:  {}x{}", metadata.width, metadata.height);
    println!("Frame rate:  {:.3} fps", metadata.fps);
    println!("Duration:    {:.2} s", metadata.duration);
    println!("Frames:      ~{}", metadata.total_frames);
    println!("Audio:       {}", if metadata.has_audio { "yes" } else { "no" });

    if let Some(preview_path) = preview {
        probe.save_preview(input, preview_path).await?;
        println!("Preview:     {}", preview_path.display());
    }
    Ok(())
}

struct ProcessArgs {
    input: PathBuf,
    output: PathBuf,
    region: Region,
    model: Option<PathBuf>,
    crf: u8,
    preset: String,
    preserve_audio: bool,
}

async fn process_command(args: ProcessArgs) -> Result<()> {
    let work_dir = tempfile::tempdir().context("Failed to create working directory")?;

    let mut builder = RemovalConfig::builder()
        .upload_dir(work_dir.path().join("uploads"))
        .output_dir(work_dir.path().join("outputs"))
        .encoder_crf(args.crf)
        .encoder_preset(args.preset)
        .preserve_audio(args.preserve_audio);
    builder = match args.model {
        #[cfg(feature = "onnx")]
        Some(model) => builder.engine_type(EngineType::Onnx).model_path(model),
        #[cfg(not(feature = "onnx"))]
        Some(_) => bail!("this build has no ONNX support; rebuild with --features onnx"),
        None => {
            log::info!("No model given, using the diffusion fallback engine");
            builder.engine_type(EngineType::Diffusion)
        },
    };
    let config = builder.build()?;

    let remover = WatermarkRemover::new(config).await?;

    let filename = args
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .context("Input path has no filename")?;
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read '{}'", args.input.display()))?;

    let receipt = remover.upload(filename, &bytes).await?;
    println!(
        "Uploaded: {}x{} @ {:.2} fps, ~{} frames",
        receipt.width, receipt.height, receipt.fps, receipt.total_frames
    );

    remover.select_region(receipt.session_id, args.region)?;
    remover.start_processing(receipt.session_id)?;

    let bar = ProgressBar::new(receipt.total_frames.max(1));
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})",
        )?
        .progress_chars("#>-"),
    );

    // Poll the session the way an HTTP client would
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = remover.session_status(receipt.session_id)?;
        bar.set_position((status.progress * receipt.total_frames.max(1) as f64) as u64);

        match status.state {
            SessionState::Completed => {
                bar.finish();
                break;
            },
            SessionState::Failed => {
                bar.abandon();
                let detail = status.error.unwrap_or_else(|| "unknown error".to_string());
                remover.destroy_session(receipt.session_id).await;
                bail!("processing failed: {detail}");
            },
            _ => {},
        }
    }

    let (produced, _) = remover.download_path(receipt.session_id)?;
    tokio::fs::copy(&produced, &args.output)
        .await
        .with_context(|| format!("Failed to write '{}'", args.output.display()))?;
    remover.destroy_session(receipt.session_id).await;

    println!("Output written to {}", args.output.display());
    Ok(())
}
