// ============================================================================
// population.rs — TriEvo
// Population Store: GPU-resident candidate + fitness buffers of equal length,
// a single reallocation entry point, and a scoped read/write mapping guard.
// ============================================================================

use crate::candidate::Candidate;
use crate::error::{EngineError, Result};
use crate::gpu::GpuContext;

const CANDIDATE_SIZE: u64 = std::mem::size_of::<Candidate>() as u64;
const FITNESS_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// Candidate buffer and fitness buffer, always sized and replaced together.
pub struct PopulationStore {
    len: usize,
    candidates: wgpu::Buffer,
    fitness: wgpu::Buffer,
    candidates_staging: wgpu::Buffer,
    fitness_staging: wgpu::Buffer,
}

struct Buffers {
    candidates: wgpu::Buffer,
    fitness: wgpu::Buffer,
    candidates_staging: wgpu::Buffer,
    fitness_staging: wgpu::Buffer,
}

fn create_buffers(device: &wgpu::Device, n: usize) -> Buffers {
    let storage = |label: &str, size: u64| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    };
    let staging = |label: &str, size: u64| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    };

    let n = n as u64;
    Buffers {
        candidates: storage("candidates", n * CANDIDATE_SIZE),
        fitness: storage("fitness", n * FITNESS_SIZE),
        candidates_staging: staging("candidates_staging", n * CANDIDATE_SIZE),
        fitness_staging: staging("fitness_staging", n * FITNESS_SIZE),
    }
}

/// `n` must be non-zero and the candidate buffer must fit one storage binding.
fn check_capacity(device: &wgpu::Device, n: usize) -> Result<()> {
    if n == 0 {
        return Err(EngineError::EmptyPopulation);
    }
    let limits = device.limits();
    let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    let bytes = (n as u64).saturating_mul(CANDIDATE_SIZE);
    if bytes > max {
        return Err(EngineError::InvalidConfig(format!(
            "population of {n} needs {bytes} bytes, device storage binding limit is {max}"
        )));
    }
    Ok(())
}

impl PopulationStore {
    /// Zero-initialised store for `n` candidates. `n == 0` and populations
    /// beyond the device's storage binding limit are rejected.
    pub fn allocate(gpu: &GpuContext, n: usize) -> Result<Self> {
        check_capacity(&gpu.device, n)?;
        let b = create_buffers(&gpu.device, n);
        Ok(Self {
            len: n,
            candidates: b.candidates,
            fitness: b.fitness,
            candidates_staging: b.candidates_staging,
            fitness_staging: b.fitness_staging,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Resize both buffers to `n`. Buffers are only recreated when the size
    /// actually changes; the returned flag says whether that happened.
    pub fn reallocate(&mut self, gpu: &GpuContext, n: usize) -> Result<bool> {
        check_capacity(&gpu.device, n)?;
        if n == self.len {
            return Ok(false);
        }
        log::debug!("Reallocating population store {} -> {}", self.len, n);
        let b = create_buffers(&gpu.device, n);
        self.candidates.destroy();
        self.fitness.destroy();
        self.candidates_staging.destroy();
        self.fitness_staging.destroy();
        self.candidates = b.candidates;
        self.fitness = b.fitness;
        self.candidates_staging = b.candidates_staging;
        self.fitness_staging = b.fitness_staging;
        self.len = n;
        Ok(true)
    }

    /// Replace the candidate buffer contents, resizing to `candidates.len()`.
    /// The fitness buffer is cleared: old scores no longer describe anything.
    pub fn upload(&mut self, gpu: &GpuContext, candidates: &[Candidate]) -> Result<()> {
        self.reallocate(gpu, candidates.len())?;
        gpu.queue
            .write_buffer(&self.candidates, 0, bytemuck::cast_slice(candidates));
        let zeros = vec![0.0f32; candidates.len()];
        gpu.queue
            .write_buffer(&self.fitness, 0, bytemuck::cast_slice(&zeros));
        Ok(())
    }

    pub fn candidate_buffer(&self) -> &wgpu::Buffer {
        &self.candidates
    }

    pub fn fitness_buffer(&self) -> &wgpu::Buffer {
        &self.fitness
    }

    /// Copy of both buffers as they currently stand on the GPU.
    pub fn map_read(&self, gpu: &GpuContext) -> Result<PopulationSnapshot> {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("population_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(
            &self.candidates,
            0,
            &self.candidates_staging,
            0,
            self.len as u64 * CANDIDATE_SIZE,
        );
        encoder.copy_buffer_to_buffer(
            &self.fitness,
            0,
            &self.fitness_staging,
            0,
            self.len as u64 * FITNESS_SIZE,
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let candidates_slice = self.candidates_staging.slice(..);
        let fitness_slice = self.fitness_staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        let tx2 = tx.clone();
        candidates_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        fitness_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx2.send(result);
        });
        gpu.wait_idle();
        for _ in 0..2 {
            rx.recv()
                .map_err(|_| EngineError::BufferMapping("map callback dropped".into()))?
                .map_err(|e| EngineError::BufferMapping(e.to_string()))?;
        }

        let candidates: Vec<Candidate> =
            bytemuck::cast_slice(&candidates_slice.get_mapped_range()[..]).to_vec();
        let fitness: Vec<f32> =
            bytemuck::cast_slice(&fitness_slice.get_mapped_range()[..]).to_vec();
        self.candidates_staging.unmap();
        self.fitness_staging.unmap();

        Ok(PopulationSnapshot {
            candidates,
            fitness,
        })
    }

    /// Exclusive read/write view of both buffers. While the view lives the
    /// store is mutably borrowed, so nothing can dispatch against it; edits
    /// become GPU-visible when the view is released or dropped.
    pub fn map_read_write<'a>(&'a mut self, gpu: &'a GpuContext) -> Result<PopulationView<'a>> {
        let PopulationSnapshot {
            candidates,
            fitness,
        } = self.map_read(gpu)?;
        Ok(PopulationView {
            store: self,
            gpu,
            candidates,
            fitness,
            dirty: false,
        })
    }
}

/// Owned copy of a population and its scores, index-aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct PopulationSnapshot {
    pub candidates: Vec<Candidate>,
    pub fitness: Vec<f32>,
}

pub struct PopulationView<'a> {
    store: &'a mut PopulationStore,
    gpu: &'a GpuContext,
    candidates: Vec<Candidate>,
    fitness: Vec<f32>,
    dirty: bool,
}

impl PopulationView<'_> {
    pub fn fitness(&self, i: usize) -> f32 {
        self.fitness[i]
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Both slices at once for in-place reordering.
    pub fn parts_mut(&mut self) -> (&mut [Candidate], &mut [f32]) {
        self.dirty = true;
        (self.candidates.as_mut_slice(), self.fitness.as_mut_slice())
    }

    /// Commit pending edits and give the store back.
    pub fn release(self) {}

    fn commit(&mut self) {
        if !self.dirty {
            return;
        }
        self.gpu.queue.write_buffer(
            &self.store.candidates,
            0,
            bytemuck::cast_slice(&self.candidates),
        );
        self.gpu
            .queue
            .write_buffer(&self.store.fitness, 0, bytemuck::cast_slice(&self.fitness));
        self.dirty = false;
    }
}

impl Drop for PopulationView<'_> {
    fn drop(&mut self) {
        self.commit();
    }
}
