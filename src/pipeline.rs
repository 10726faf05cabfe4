//! Stream-level stabilization: source → stabilizer → sink.

use anyhow::Result;
use serde::Serialize;
use std::time::Instant;

use crate::ingest::{FrameSink, FrameSource};
use crate::stabilize::{StabilizationInfo, Stabilizer, TrackingState};
use crate::ui::FrameProgress;

const PROGRESS_INTERVAL: u64 = 100;

/// Outcome of one `stabilize_stream` run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StreamSummary {
    pub method: String,
    pub frames: u64,
    /// Frames whose output was a hold.
    pub degraded_frames: u64,
    pub elapsed_ms: f64,
    /// Final reporting snapshot (homography stabilizers only).
    pub info: Option<StabilizationInfo>,
}

impl StreamSummary {
    pub fn mean_frame_ms(&self) -> f64 {
        if self.frames == 0 {
            f64::NAN
        } else {
            self.elapsed_ms / self.frames as f64
        }
    }
}

/// Stabilize up to `limit` frames of `source` into `sink`.
///
/// The stabilizer is reset first, so it starts on the first frame of the
/// source. Read or write failures abort the run.
pub fn stabilize_stream(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    stabilizer: &mut dyn Stabilizer,
    limit: Option<u64>,
) -> Result<StreamSummary> {
    stabilize_stream_with_progress(source, sink, stabilizer, limit, &FrameProgress::hidden())
}

pub fn stabilize_stream_with_progress(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    stabilizer: &mut dyn Stabilizer,
    limit: Option<u64>,
    progress: &FrameProgress,
) -> Result<StreamSummary> {
    stabilizer.reset();
    log::info!("stabilizing {} with {}", source.describe(), stabilizer.name());

    let started = Instant::now();
    let mut frames = 0u64;
    let mut degraded_frames = 0u64;
    let mut dimensions = None;
    loop {
        if limit.is_some_and(|max| frames >= max) {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        match dimensions {
            None => dimensions = Some(frame.dimensions()),
            Some(dims) if dims != frame.dimensions() => {
                log::warn!(
                    "frame {}: size {:?} differs from stream size {:?}",
                    frame.index(),
                    frame.dimensions(),
                    dims
                );
            }
            Some(_) => {}
        }

        let output = stabilizer.process(&frame);
        if stabilizer.state() == TrackingState::Degraded {
            degraded_frames += 1;
        }
        sink.write_frame(&output)?;
        frames += 1;
        progress.inc();

        if frames % PROGRESS_INTERVAL == 0 {
            match stabilizer.info() {
                Some(info) => log::info!(
                    "processed {} frames (confidence {:.3}, correction {:.3})",
                    frames,
                    info.avg_confidence,
                    info.transform_magnitude
                ),
                None => log::info!("processed {} frames", frames),
            }
        }
    }
    sink.finish()?;
    progress.finish();

    let summary = StreamSummary {
        method: stabilizer.name().to_string(),
        frames,
        degraded_frames,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        info: stabilizer.info(),
    };
    log::info!(
        "done: {} frames, {} degraded, {:.2} ms/frame",
        summary.frames,
        summary.degraded_frames,
        summary.mean_frame_ms()
    );
    Ok(summary)
}
