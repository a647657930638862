// ============================================================================
// headless.rs — TriEvo
// Window-less runner: a fixed number of refinement ticks, then PNG export.
// ============================================================================

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use crate::config::EvolverConfig;
use crate::error::Result;
use crate::evolve::Evolver;
use crate::gpu::GpuContext;
use crate::image_io::ReferenceImage;

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub ticks: u32,
    pub output: PathBuf,
}

pub fn run_headless(
    config: &HeadlessConfig,
    evolver_config: EvolverConfig,
    reference: &ReferenceImage,
) -> Result<()> {
    let gpu = GpuContext::headless()?;
    let mut evolver = Evolver::new(&gpu, evolver_config, reference)?;
    let stop = AtomicBool::new(false);

    log::info!(
        "Headless run started: {} ticks on {}x{}",
        config.ticks,
        reference.width,
        reference.height
    );

    let started = Instant::now();
    for _ in 0..config.ticks {
        let report = evolver.run_tick(&gpu, &stop)?;
        let done = report.tick;
        let elapsed = started.elapsed().as_secs_f64().max(1e-6);
        let remaining = config.ticks.saturating_sub(done);
        let eta_secs = remaining as f64 * elapsed / done as f64;
        log::info!(
            "Headless progress: {}/{} | {:.2} ticks/s | ETA={:.1} s",
            done,
            config.ticks,
            done as f64 / elapsed,
            eta_secs,
        );
    }

    evolver.canvas().save_png(&gpu, &config.output)
}
