// ============================================================================
// gpu.rs — TriEvo
// Device/queue ownership and adapter selection for windowed and headless runs.
// ============================================================================

use crate::error::{EngineError, Result};

/// The single command issuer: every dispatch and readback goes through here.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Device without a presentation surface (headless runs and tests).
    /// Falls back to a software adapter when no hardware one is found.
    pub fn headless() -> Result<Self> {
        Self::headless_with(false).or_else(|e| {
            log::warn!("{e}; retrying with the fallback adapter");
            Self::headless_with(true)
        })
    }

    fn headless_with(force_fallback: bool) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: force_fallback,
        }))
        .ok_or(EngineError::NoAdapter)?;
        pollster::block_on(Self::from_adapter(&adapter, "trievo_headless_device"))
    }

    /// Device able to present to `surface`.
    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
    ) -> Result<(Self, wgpu::Adapter)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(EngineError::NoAdapter)?;
        let ctx = Self::from_adapter(&adapter, "trievo_device").await?;
        Ok((ctx, adapter))
    }

    async fn from_adapter(adapter: &wgpu::Adapter, label: &str) -> Result<Self> {
        log::info!("GPU: {} ({:?})", adapter.get_info().name, adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(label),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| EngineError::DeviceCreation(e.to_string()))?;

        Ok(Self { device, queue })
    }

    /// Block until every submitted command has finished.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
