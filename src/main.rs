// Example runner for the `pyramid_flow` library.
//
// Every image path on the command line is one frame, in order. All frames go
// through the `ParallelPipeline` at once and the reports come back in frame
// order. Overrides are read from the environment:
//   PF_VARIANT   `brightness` (default) or `gradient`
//   PF_BLOCK     block side on the analysed level
//   PF_LEVELS    pyramid levels per frame
//   PF_DUMP_DIR  directory for the exported pyramid level of each frame

use anyhow::{Context, bail};
use futures::future::join_all;
use pyramid_flow::core_modules::utils::image_helper::{load_rgba, save_field};
use pyramid_flow::parallel_pipeline::ParallelPipeline;
use pyramid_flow::pipeline::{GlobalMotion, MotionVariant, PipelineConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn env_override<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => Ok(Some(value.parse().with_context(|| format!("{name}={value}"))?)),
        Err(_) => Ok(None),
    }
}

fn config_for(width: u32, height: u32, dump: bool) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig {
        image_width: width,
        image_height: height,
        ..PipelineConfig::default()
    };
    match std::env::var("PF_VARIANT").as_deref() {
        Err(_) | Ok("brightness") => {}
        Ok("gradient") => config.variant = MotionVariant::GradientDirection,
        Ok(other) => bail!("unknown PF_VARIANT `{other}`"),
    }
    if let Some(block) = env_override::<u32>("PF_BLOCK")? {
        config.block_width = block;
        config.block_height = block;
    }
    if let Some(levels) = env_override::<usize>("PF_LEVELS")? {
        config.pyramid_levels = levels;
    }
    if dump {
        config.export_level = Some(config.pyramid_levels.saturating_sub(1));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.len() < 2 {
        bail!("usage: pyramid_flow <frame> <frame> [frame...]");
    }

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let frame = load_rgba(path).with_context(|| format!("loading {}", path.display()))?;
        frames.push(frame);
    }
    let (width, height) = (frames[0].1, frames[0].2);
    if let Some((_, w, h)) = frames.iter().find(|(_, w, h)| (*w, *h) != (width, height)) {
        bail!("frames differ in size: {width}x{height} and {w}x{h}");
    }

    let dump_dir = std::env::var_os("PF_DUMP_DIR").map(PathBuf::from);
    let config = config_for(width, height, dump_dir.is_some())?;
    let pipeline = ParallelPipeline::new(config)?;

    let reports = join_all(frames.iter().map(|(data, _, _)| pipeline.process_frame(data))).await;

    for (path, report) in paths.iter().zip(reports) {
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!(frame = %path.display(), error = %e, "frame failed");
                continue;
            }
        };
        match report.global_motion {
            GlobalMotion::Detected {
                motion,
                contributing_blocks,
            } => info!(
                frame = report.frame_index,
                dx = motion.x,
                dy = motion.y,
                blocks = contributing_blocks,
                "motion detected"
            ),
            GlobalMotion::NoMotionDetected => info!(frame = report.frame_index, state = ?report.state, "no motion"),
        }
        if let (Some(dir), Some(level)) = (&dump_dir, &report.pyramid_level) {
            let out = dir.join(format!("frame_{:04}_level_{}.png", report.frame_index, level.index));
            save_field(&out, &level.field).with_context(|| format!("writing {}", out.display()))?;
        }
    }

    pipeline.shutdown().await;
    Ok(())
}
