//! quality_report - quality indicators for a raw/stabilized stream pair

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use unshake::ui::{Ui, UiMode};
use unshake::{BackendRegistry, FileSource, Method, QualityReport, StabilizeConfig, WarmupPolicy};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compute stabilization quality indicators")]
struct Args {
    /// Raw input: video file, image directory or synthetic:// URI.
    raw: String,
    /// Stabilized output of the same stream.
    stabilized: String,
    /// Method whose latency is measured on the raw stream.
    #[arg(long, short, default_value = "homography-dense")]
    method: String,
    /// Config file (JSON or TOML); defaults to UNSHAKE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Cap on frames read per stream.
    #[arg(long)]
    max_frames: Option<usize>,
    /// disjoint | rewind (overrides config).
    #[arg(long)]
    warmup_policy: Option<String>,
    /// Near-black luminance threshold (overrides config).
    #[arg(long)]
    black_threshold: Option<u8>,
    /// Also write the JSON report here.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui.parse::<UiMode>()?);

    let mut config = StabilizeConfig::load_with(args.config.as_deref())?;
    if args.max_frames.is_some() {
        config.quality.max_frames = args.max_frames;
    }
    if let Some(policy) = &args.warmup_policy {
        config.quality.warmup_policy = policy.parse::<WarmupPolicy>()?;
    }
    if let Some(threshold) = args.black_threshold {
        config.quality.black_threshold = threshold;
    }
    let method: Method = args.method.parse()?;

    let backend = BackendRegistry::with_builtin().require(&config.backend)?;
    let mut stabilizer = method.build(&config, backend.clone());

    let report = {
        let _stage = ui.stage("Quality indicators");
        let mut raw = FileSource::open(&args.raw)?;
        let mut stabilized = FileSource::open(&args.stabilized)?;
        QualityReport::evaluate(
            &mut raw,
            &mut stabilized,
            stabilizer.as_mut(),
            backend.as_ref(),
            &config.quality,
        )?
    };

    println!("{}", report.to_json()?);
    if let Some(path) = &args.out {
        report.write_json(path)?;
    }
    Ok(())
}
