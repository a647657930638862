// ============================================================================
// kernels.rs — TriEvo
// Fitness and compositor compute pipelines, their binding contract, and the
// dispatch + barrier helpers the generation loop drives.
//
// Binding slots (group 0), shared by both kernels:
//   0  uniform  Params { image_size, count, flip_y }
//   1  storage  Candidate array
//   2  storage  fitness scalars           (fitness kernel only)
//   3  texture  reference                 (fitness kernel only)
//   4  texture  canvas (sampled for fitness, write-only storage for compositor)
// ============================================================================

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::config::Origin;
use crate::error::{EngineError, Result};
use crate::gpu::GpuContext;
use crate::image_io::{Canvas, ReferenceTexture, TEXTURE_FORMAT};
use crate::population::PopulationStore;

pub const FITNESS_WORKGROUP: u32 = 64;
pub const COMPOSITE_WORKGROUP_X: u32 = 16;
pub const COMPOSITE_WORKGROUP_Y: u32 = 16;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct KernelParams {
    pub image_size: [u32; 2],
    pub count: u32,
    pub flip_y: u32,
}

pub struct Kernels {
    fitness_pipeline: wgpu::ComputePipeline,
    fitness_bgl: wgpu::BindGroupLayout,
    fitness_params: wgpu::Buffer,

    composite_pipeline: wgpu::ComputePipeline,
    composite_bgl: wgpu::BindGroupLayout,
    composite_params: wgpu::Buffer,
}

impl Kernels {
    /// Compile both kernels. Any validation error while building the modules
    /// or pipelines is returned instead of leaving an unusable pipeline.
    pub fn new(gpu: &GpuContext) -> Result<Self> {
        let device = &gpu.device;

        let fitness_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fitness_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage(1, false),
                bgl_storage(2, false),
                bgl_texture(3),
                bgl_texture(4),
            ],
        });
        let fitness_pipeline = compile(
            device,
            "fitness",
            &fitness_bgl,
            include_str!("shaders/fitness.wgsl"),
        )?;

        let composite_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite_bgl"),
            entries: &[bgl_uniform(0), bgl_storage(1, true), bgl_storage_texture(4)],
        });
        let composite_pipeline = compile(
            device,
            "composite",
            &composite_bgl,
            include_str!("shaders/composite.wgsl"),
        )?;

        let params_buffer = |label: &str| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&KernelParams::zeroed()),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        };

        Ok(Self {
            fitness_pipeline,
            fitness_bgl,
            fitness_params: params_buffer("fitness_params"),
            composite_pipeline,
            composite_bgl,
            composite_params: params_buffer("composite_params"),
        })
    }

    /// Score every candidate in `store`, then block until the scores (and the
    /// resolved colours) are visible.
    pub fn evaluate(
        &self,
        gpu: &GpuContext,
        store: &PopulationStore,
        reference: &ReferenceTexture,
        canvas: &Canvas,
        origin: Origin,
    ) -> Result<()> {
        check_same_size(reference, canvas)?;
        let count = store.len() as u32;
        let params = KernelParams {
            image_size: [reference.width, reference.height],
            count,
            flip_y: origin.flip_flag(),
        };
        gpu.queue
            .write_buffer(&self.fitness_params, 0, bytemuck::bytes_of(&params));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fitness_bg"),
            layout: &self.fitness_bgl,
            entries: &[
                bg_buffer(0, &self.fitness_params),
                bg_buffer(1, store.candidate_buffer()),
                bg_buffer(2, store.fitness_buffer()),
                bg_view(3, &reference.view),
                bg_view(4, &canvas.view),
            ],
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fitness_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fitness_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.fitness_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(count.div_ceil(FITNESS_WORKGROUP), 1, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.wait_idle();
        Ok(())
    }

    /// Rasterise the first `count` candidates of `store` onto the canvas and
    /// wait for the writes to land.
    pub fn composite(
        &self,
        gpu: &GpuContext,
        store: &PopulationStore,
        count: usize,
        canvas: &Canvas,
        origin: Origin,
    ) -> Result<()> {
        if count == 0 || count > store.len() {
            return Err(EngineError::SizeMismatch {
                expected: store.len(),
                actual: count,
            });
        }
        let params = KernelParams {
            image_size: [canvas.width, canvas.height],
            count: count as u32,
            flip_y: origin.flip_flag(),
        };
        gpu.queue
            .write_buffer(&self.composite_params, 0, bytemuck::bytes_of(&params));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite_bg"),
            layout: &self.composite_bgl,
            entries: &[
                bg_buffer(0, &self.composite_params),
                bg_buffer(1, store.candidate_buffer()),
                bg_view(4, &canvas.view),
            ],
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("composite_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("composite_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.composite_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                canvas.width.div_ceil(COMPOSITE_WORKGROUP_X),
                canvas.height.div_ceil(COMPOSITE_WORKGROUP_Y),
                1,
            );
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.wait_idle();
        Ok(())
    }
}

fn check_same_size(reference: &ReferenceTexture, canvas: &Canvas) -> Result<()> {
    if reference.width != canvas.width || reference.height != canvas.height {
        return Err(EngineError::SizeMismatch {
            expected: (reference.width * reference.height) as usize,
            actual: (canvas.width * canvas.height) as usize,
        });
    }
    Ok(())
}

// ======================== Helpers ========================

fn compile(
    device: &wgpu::Device,
    name: &str,
    bgl: &wgpu::BindGroupLayout,
    body: &str,
) -> Result<wgpu::ComputePipeline> {
    let source = format!("{COMMON_WGSL}\n{body}");

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{name}_pipeline_layout")),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{name}_pipeline")),
        layout: Some(&layout),
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        log::error!("Shader `{}` rejected:\n{}", name, err);
        return Err(EngineError::ShaderCompilation {
            label: name.to_string(),
            message: err.to_string(),
        });
    }
    Ok(pipeline)
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_texture(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn bgl_storage_texture(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: TEXTURE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn bg_buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn bg_view(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use crate::gpu::tests::test_gpu;
    use crate::image_io::ReferenceImage;
    use crate::raster::{self, PixelGrid};

    #[test]
    fn broken_shader_fails_fast() {
        let Some(gpu) = test_gpu() else { return };
        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("empty_bgl"),
                entries: &[],
            });
        let result = compile(&gpu.device, "broken", &bgl, "fn main( {");
        assert!(matches!(result, Err(EngineError::ShaderCompilation { .. })));
    }

    #[test]
    fn gpu_fitness_matches_cpu_oracle() {
        let Some(gpu) = test_gpu() else { return };
        let kernels = Kernels::new(&gpu).unwrap();

        let (w, h) = (8u32, 6u32);
        let rgba: Vec<u8> = (0..w * h)
            .flat_map(|i| [(i * 5) as u8, (255 - i * 3) as u8, (i * 11 % 256) as u8, 255])
            .collect();
        let image = ReferenceImage::from_rgba(w, h, rgba.clone()).unwrap();
        let reference = ReferenceTexture::upload(&gpu, &image);
        let canvas = Canvas::new(&gpu, w, h);

        let pop = vec![
            Candidate::new([[0, 0], [7, 0], [0, 5]], [1.0; 4]),
            Candidate::new([[2, 1], [6, 5], [1, 4]], [1.0; 4]),
            Candidate::new([[-3, -3], [20, 2], [3, 20]], [1.0; 4]),
            Candidate::new([[1, 1], [3, 3], [5, 5]], [1.0; 4]),
            Candidate::new([[30, 30], [31, 30], [30, 31]], [1.0; 4]),
        ];
        let blank = vec![0u8; (w * h * 4) as usize];

        for origin in [Origin::TopLeft, Origin::BottomLeft] {
            let mut store = PopulationStore::allocate(&gpu, pop.len()).unwrap();
            store.upload(&gpu, &pop).unwrap();
            kernels
                .evaluate(&gpu, &store, &reference, &canvas, origin)
                .unwrap();
            let snap = store.map_read(&gpu).unwrap();

            for (i, c) in pop.iter().enumerate() {
                let (score, color) = raster::fitness(
                    c,
                    PixelGrid { width: w, height: h, rgba: &rgba },
                    PixelGrid { width: w, height: h, rgba: &blank },
                    origin,
                );
                assert!(
                    (snap.fitness[i] - score).abs() <= 1e-3 * score.abs().max(1.0),
                    "{origin:?} candidate {i}: gpu={} cpu={}",
                    snap.fitness[i],
                    score
                );
                for k in 0..4 {
                    assert!((snap.candidates[i].color[k] - color[k]).abs() < 1e-4);
                }
                assert_eq!(snap.candidates[i].vertices, c.vertices);
            }
        }
    }

    #[test]
    fn composite_paints_only_covered_pixels() {
        let Some(gpu) = test_gpu() else { return };
        let kernels = Kernels::new(&gpu).unwrap();
        let canvas = Canvas::new(&gpu, 20, 17);

        let tri = Candidate::new([[2, 2], [15, 4], [5, 14]], [0.0, 1.0, 0.0, 1.0]);
        let mut store = PopulationStore::allocate(&gpu, 1).unwrap();
        store.upload(&gpu, &[tri]).unwrap();
        kernels
            .composite(&gpu, &store, 1, &canvas, Origin::BottomLeft)
            .unwrap();

        let pixels = canvas.read_pixels(&gpu).unwrap();
        let covered = raster::covered_texels(&[tri], 20, 17, Origin::BottomLeft);
        for row in 0..17 {
            for x in 0..20 {
                let i = ((row * 20 + x) * 4) as usize;
                let expected: [u8; 4] = if covered.contains(&(x, row)) {
                    [0, 255, 0, 255]
                } else {
                    [0, 0, 0, 0]
                };
                assert_eq!(pixels[i..i + 4], expected, "texel ({x},{row})");
            }
        }
    }

    #[test]
    fn composite_draws_only_the_first_count_slots_and_lower_slot_wins() {
        let Some(gpu) = test_gpu() else { return };
        let kernels = Kernels::new(&gpu).unwrap();
        let red = Candidate::new([[0, 0], [8, 0], [0, 8]], [1.0, 0.0, 0.0, 1.0]);
        let blue = Candidate::new([[3, 3], [12, 3], [3, 12]], [0.0, 0.0, 1.0, 1.0]);
        let mut store = PopulationStore::allocate(&gpu, 2).unwrap();
        store.upload(&gpu, &[red, blue]).unwrap();

        let in_red = raster::covered_texels(&[red], 12, 12, Origin::TopLeft);
        let in_blue = raster::covered_texels(&[blue], 12, 12, Origin::TopLeft);
        assert!(in_red.iter().any(|t| in_blue.contains(t)));
        assert!(in_blue.iter().any(|t| !in_red.contains(t)));

        for count in [1, 2] {
            let canvas = Canvas::new(&gpu, 12, 12);
            kernels
                .composite(&gpu, &store, count, &canvas, Origin::TopLeft)
                .unwrap();
            let pixels = canvas.read_pixels(&gpu).unwrap();
            for row in 0..12 {
                for x in 0..12 {
                    let i = ((row * 12 + x) * 4) as usize;
                    let expected: [u8; 4] = if in_red.contains(&(x, row)) {
                        [255, 0, 0, 255]
                    } else if count == 2 && in_blue.contains(&(x, row)) {
                        [0, 0, 255, 255]
                    } else {
                        [0, 0, 0, 0]
                    };
                    assert_eq!(pixels[i..i + 4], expected, "count {count} texel ({x},{row})");
                }
            }
        }
    }

    #[test]
    fn composite_rejects_count_beyond_store() {
        let Some(gpu) = test_gpu() else { return };
        let kernels = Kernels::new(&gpu).unwrap();
        let canvas = Canvas::new(&gpu, 4, 4);
        let store = PopulationStore::allocate(&gpu, 2).unwrap();
        assert!(matches!(
            kernels.composite(&gpu, &store, 3, &canvas, Origin::TopLeft),
            Err(EngineError::SizeMismatch { expected: 2, actual: 3 })
        ));
    }
}
