// ============================================================================
// evolve.rs — TriEvo
// Generation loop: Seed -> (Evaluate -> Rank -> Mutate)* -> Composite.
// One call to `run_tick` is one refinement tick; everything runs on the
// calling thread with a blocking wait after every dispatch.
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::candidate::Candidate;
use crate::config::EvolverConfig;
use crate::error::Result;
use crate::gpu::GpuContext;
use crate::image_io::{check_texture_size, Canvas, ReferenceImage, ReferenceTexture};
use crate::kernels::Kernels;
use crate::population::PopulationStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Seeding,
    Evaluating,
    Ranking,
    Mutating,
    Compositing,
}

/// Top-ranked candidates kept to breed the next population.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Survivors(pub Vec<Candidate>);

impl Survivors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of one refinement tick.
#[derive(Clone, Debug)]
pub struct TickReport {
    pub tick: u32,
    pub rounds_run: u32,
    pub best_fitness: f32,
    pub survivors: Vec<Candidate>,
    pub cancelled: bool,
}

impl TickReport {
    pub fn log(&self, total_rounds: u32) {
        if self.cancelled {
            log::info!(
                "Tick {} cancelled after {}/{} rounds",
                self.tick,
                self.rounds_run,
                total_rounds
            );
        } else {
            log::info!(
                "Tick {}: {} rounds | best fitness {:.4} | composited {} triangles",
                self.tick,
                self.rounds_run,
                self.best_fitness,
                self.survivors.len()
            );
        }
    }
}

// ======================== Population Operators ========================

/// `n` candidates with vertices uniform over the grid's corner coordinates
/// `0..=width` x `0..=height`, and a fixed colour. Coverage samples pixel
/// centres, so the far edge is needed to reach the last column and row.
pub fn seed_population<R: Rng>(
    rng: &mut R,
    n: usize,
    width: u32,
    height: u32,
    color: [f32; 4],
) -> Vec<Candidate> {
    (0..n)
        .map(|_| {
            let mut vertex = || {
                [
                    rng.gen_range(0..=width as i32),
                    rng.gen_range(0..=height as i32),
                ]
            };
            Candidate::new([vertex(), vertex(), vertex()], color)
        })
        .collect()
}

/// Stable sort by fitness, best first. Candidates move with their scores.
pub fn rank(candidates: &mut [Candidate], fitness: &mut [f32]) {
    debug_assert_eq!(candidates.len(), fitness.len());
    let mut order: Vec<usize> = (0..fitness.len()).collect();
    order.sort_by(|&a, &b| fitness[b].total_cmp(&fitness[a]));

    let ranked_candidates: Vec<Candidate> = order.iter().map(|&i| candidates[i]).collect();
    let ranked_fitness: Vec<f32> = order.iter().map(|&i| fitness[i]).collect();
    candidates.copy_from_slice(&ranked_candidates);
    fitness.copy_from_slice(&ranked_fitness);
}

/// First `k` entries of an already ranked population.
pub fn select_survivors(ranked: &[Candidate], k: usize) -> Survivors {
    Survivors(ranked[..k.min(ranked.len())].to_vec())
}

/// Next population of `target` candidates: cycle through the survivors and
/// jitter each vertex by at most `bounds` pixels per axis. Colour is reset.
pub fn expand<R: Rng>(
    survivors: &Survivors,
    target: usize,
    bounds: (i32, i32),
    color: [f32; 4],
    rng: &mut R,
) -> Vec<Candidate> {
    if survivors.is_empty() {
        return Vec::new();
    }
    let (bx, by) = bounds;
    survivors
        .0
        .iter()
        .cycle()
        .take(target)
        .map(|parent| {
            let vertices = parent.vertices.map(|[x, y]| {
                [x + rng.gen_range(-bx..=bx), y + rng.gen_range(-by..=by)]
            });
            Candidate::new(vertices, color)
        })
        .collect()
}

// ======================== Evolver ========================

pub struct Evolver {
    config: EvolverConfig,
    kernels: Kernels,
    store: PopulationStore,
    reference: ReferenceTexture,
    canvas: Canvas,
    rng: StdRng,
    phase: Phase,
    ticks: u32,
}

impl Evolver {
    pub fn new(gpu: &GpuContext, config: EvolverConfig, image: &ReferenceImage) -> Result<Self> {
        config.validate()?;
        check_texture_size(gpu, image.width, image.height)?;
        let kernels = Kernels::new(gpu)?;
        let store = PopulationStore::allocate(gpu, config.population_size)?;
        let reference = ReferenceTexture::upload(gpu, image);
        let canvas = Canvas::new(gpu, image.width, image.height);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        log::info!(
            "Evolver ready: {}x{} reference | population={} rounds={} survivors={} origin={:?}",
            image.width,
            image.height,
            config.population_size,
            config.rounds,
            config.survivors,
            config.origin,
        );

        Ok(Self {
            config,
            kernels,
            store,
            reference,
            canvas,
            rng,
            phase: Phase::Idle,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &EvolverConfig {
        &self.config
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run one refinement tick. `stop` is polled before every evaluation
    /// round; a dispatch already issued always completes first. A cancelled
    /// tick skips compositing. On error the loop is left in `Idle`.
    pub fn run_tick(&mut self, gpu: &GpuContext, stop: &AtomicBool) -> Result<TickReport> {
        debug_assert_eq!(self.phase, Phase::Idle, "tick started mid-tick");
        let result = self.step_phases(gpu, stop);
        self.phase = Phase::Idle;
        result
    }

    fn step_phases(&mut self, gpu: &GpuContext, stop: &AtomicBool) -> Result<TickReport> {
        let (width, height) = (self.reference.width, self.reference.height);
        let n = self.config.population_size;
        let k = self.config.survivors;
        let bounds = self.config.mutation_bounds(width, height);
        let color = self.config.initial_color;
        let origin = self.config.origin;

        let mut round = 0u32;
        let mut best_fitness = 0.0f32;
        let mut survivors = Survivors::default();
        let mut cancelled = false;

        let mut phase = Phase::Seeding;
        loop {
            self.phase = phase;
            log::debug!("tick {} round {}: {:?}", self.ticks, round, phase);
            phase = match phase {
                Phase::Seeding => {
                    let pop = seed_population(&mut self.rng, n, width, height, color);
                    self.store.upload(gpu, &pop)?;
                    Phase::Evaluating
                }
                Phase::Evaluating => {
                    if stop.load(Ordering::Relaxed) {
                        cancelled = true;
                        Phase::Idle
                    } else {
                        self.kernels
                            .evaluate(gpu, &self.store, &self.reference, &self.canvas, origin)?;
                        round += 1;
                        Phase::Ranking
                    }
                }
                Phase::Ranking => {
                    let mut view = self.store.map_read_write(gpu)?;
                    let (candidates, fitness) = view.parts_mut();
                    rank(candidates, fitness);
                    best_fitness = view.fitness(0);
                    survivors = select_survivors(view.candidates(), k);
                    view.release();
                    if round < self.config.rounds {
                        Phase::Mutating
                    } else {
                        Phase::Compositing
                    }
                }
                Phase::Mutating => {
                    let next = expand(&survivors, n, bounds, color, &mut self.rng);
                    self.store.upload(gpu, &next)?;
                    Phase::Evaluating
                }
                Phase::Compositing => {
                    self.kernels
                        .composite(gpu, &self.store, survivors.len(), &self.canvas, origin)?;
                    Phase::Idle
                }
                Phase::Idle => break,
            };
        }

        self.ticks += 1;
        let report = TickReport {
            tick: self.ticks,
            rounds_run: round,
            best_fitness,
            survivors: survivors.0,
            cancelled,
        };
        report.log(self.config.rounds);
        Ok(report)
    }
}
