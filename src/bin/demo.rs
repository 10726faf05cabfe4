//! demo - end-to-end synthetic run: shaky clip in, three stabilizers compared

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use unshake::ingest::{FrameSink, FrameSource, SyntheticScene};
use unshake::pipeline::stabilize_stream_with_progress;
use unshake::ui::{Ui, UiMode};
use unshake::{
    BackendRegistry, ImageSequenceSink, MemorySink, MemorySource, Method, QualityReport,
    StabilizeConfig, StreamSummary,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames.
    #[arg(long, default_value_t = 90)]
    frames: u64,
    #[arg(long, default_value_t = 320)]
    width: u32,
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// Vision backend name.
    #[arg(long, default_value = "cpu")]
    backend: String,
    /// Also write raw and stabilized PNG sequences under this directory.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Print the reports as JSON instead of a table.
    #[arg(long)]
    json: bool,
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frames < 2 {
        return Err(anyhow!("frames must be >= 2"));
    }
    let ui = Ui::detect(args.ui.parse::<UiMode>()?);

    let mut config = StabilizeConfig::load()?;
    config.backend = args.backend.clone();
    let backend = BackendRegistry::with_builtin().require(&config.backend)?;

    let mut raw = {
        let _stage = ui.stage("Generate shaky clip");
        let scene = SyntheticScene::shaky(args.width, args.height, args.frames);
        let frames = (0..args.frames)
            .map(|i| scene.render(i))
            .collect::<Result<Vec<_>>>()?;
        MemorySource::new(frames)
    };
    if let Some(out) = &args.out {
        write_sequence(&mut raw, &out.join("raw"))?;
    }

    let mut results: Vec<(StreamSummary, QualityReport)> = Vec::new();
    for method in Method::ALL {
        let _stage = ui.stage(&format!("Stabilize + evaluate ({})", method));
        let mut stabilizer = method.build(&config, backend.clone());

        raw.rewind()?;
        let mut sink = MemorySink::new();
        let progress = ui.frames(&method.to_string(), Some(args.frames));
        let summary =
            stabilize_stream_with_progress(&mut raw, &mut sink, stabilizer.as_mut(), None, &progress)?;
        let mut stabilized = sink.into_source();
        if let Some(out) = &args.out {
            write_sequence(&mut stabilized, &out.join(method.to_string()))?;
        }

        let report = QualityReport::evaluate(
            &mut raw,
            &mut stabilized,
            stabilizer.as_mut(),
            backend.as_ref(),
            &config.quality,
        )?;
        results.push((summary, report));
    }

    if args.json {
        let reports: Vec<&QualityReport> = results.iter().map(|(_, r)| r).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "{:<18} {:>11} {:>10} {:>10} {:>11} {:>10} {:>10} {:>10}",
        "method", "latency_ms", "stab_raw", "stab_out", "improvement", "cropping", "distortion",
        "conf/mag"
    );
    for (summary, report) in &results {
        let info = summary
            .info
            .map(|i| format!("{:.2}/{:.2}", i.avg_confidence, i.transform_magnitude))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<18} {:>11} {:>10} {:>10} {:>11} {:>10} {:>10} {:>10}",
            report.method,
            metric(report.latency_ms, 2),
            metric(report.stability_before, 3),
            metric(report.stability_after, 3),
            metric(report.improvement, 3),
            metric(report.cropping_ratio, 3),
            metric(report.distortion, 4),
            info
        );
    }
    Ok(())
}

fn metric(value: f64, precision: usize) -> String {
    if value.is_finite() {
        format!("{:.*}", precision, value)
    } else {
        "n/a".to_string()
    }
}

fn write_sequence(source: &mut dyn FrameSource, dir: &std::path::Path) -> Result<()> {
    source.rewind()?;
    let mut sink = ImageSequenceSink::create(dir)?;
    while let Some(frame) = source.next_frame()? {
        sink.write_frame(&frame)?;
    }
    sink.finish()?;
    source.rewind()
}
