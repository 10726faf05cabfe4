//! stabilize - stabilize a video or image sequence into a PNG sequence

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use unshake::pipeline::stabilize_stream_with_progress;
use unshake::ui::{Ui, UiMode};
use unshake::{
    BackendRegistry, FileSource, ImageSequenceSink, Method, QualityReport, StabilizeConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stabilize a video into a PNG sequence")]
struct Args {
    /// Input: video file, image directory or synthetic:// URI.
    input: String,
    /// Output directory for frame_NNNNNN.png files.
    #[arg(long, short, default_value = "stabilized")]
    output: PathBuf,
    /// rigid | homography-dense | homography-sparse
    #[arg(long, short, default_value = "homography-dense")]
    method: String,
    /// Config file (JSON or TOML); defaults to UNSHAKE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Vision backend name (overrides config).
    #[arg(long)]
    backend: Option<String>,
    /// Smoothing factor in [0, 1] (overrides config).
    #[arg(long)]
    alpha: Option<f64>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Compute the quality report after stabilizing.
    #[arg(long)]
    report: bool,
    /// Write the quality report JSON here as well as to stdout.
    #[arg(long, requires = "report")]
    report_out: Option<PathBuf>,
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui.parse::<UiMode>()?);

    let mut config = StabilizeConfig::load_with(args.config.as_deref())?;
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    if let Some(alpha) = args.alpha {
        config.rigid = config.rigid.with_alpha(alpha);
        config.homography = config.homography.with_alpha(alpha);
    }
    let method: Method = args.method.parse()?;

    let registry = BackendRegistry::with_builtin();
    let backend = registry.require(&config.backend)?;
    let mut stabilizer = method.build(&config, backend.clone());

    let summary = {
        let _stage = ui.stage(&format!("Stabilize ({})", method));
        let mut source = FileSource::open(&args.input)?;
        let mut sink = ImageSequenceSink::create(&args.output)?;
        let progress = ui.frames("frames", args.max_frames);
        stabilize_stream_with_progress(
            &mut source,
            &mut sink,
            stabilizer.as_mut(),
            args.max_frames,
            &progress,
        )?
    };
    println!(
        "{} frames -> {} ({} held, {:.2} ms/frame)",
        summary.frames,
        args.output.display(),
        summary.degraded_frames,
        summary.mean_frame_ms()
    );
    if let Some(info) = summary.info {
        println!(
            "confidence {:.3}, correction magnitude {:.3}, history {}",
            info.avg_confidence, info.transform_magnitude, info.history_length
        );
    }

    if args.report {
        let report = {
            let _stage = ui.stage("Quality report");
            let mut quality = config.quality.clone();
            if let Some(max) = args.max_frames {
                quality.max_frames = Some(max as usize);
            }
            let mut raw = FileSource::open(&args.input)?;
            let output = args.output.to_string_lossy().into_owned();
            let mut stabilized = FileSource::open(&output)?;
            QualityReport::evaluate(
                &mut raw,
                &mut stabilized,
                stabilizer.as_mut(),
                backend.as_ref(),
                &quality,
            )?
        };
        println!("{}", report.to_json()?);
        if let Some(path) = &args.report_out {
            report
                .write_json(path)
                .with_context(|| format!("failed to save report to {}", path.display()))?;
        }
    }
    Ok(())
}
