// ============================================================================
// app.rs — TriEvo
// Windowed front end: winit event loop, advance trigger, canvas display.
// ============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use winit::{
    application::ApplicationHandler,
    event::{KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowAttributes},
};

use crate::config::{AppConfig, EvolverConfig};
use crate::error::{EngineError, Result};
use crate::evolve::{Evolver, TickReport};
use crate::gpu::GpuContext;
use crate::image_io::ReferenceImage;
use crate::input::AdvanceTrigger;
use crate::renderer::{CanvasBlit, HudRenderer, HudStatus};

// ======================== Application ========================

pub struct App {
    state: Option<AppState>,
    app_config: AppConfig,
    evolver_config: EvolverConfig,
    reference: ReferenceImage,
    stop: Arc<AtomicBool>,
    error: Option<EngineError>,
}

struct AppState {
    gpu: GpuContext,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    window: Arc<Window>,

    evolver: Evolver,
    blit: CanvasBlit,
    hud: HudRenderer,

    trigger: AdvanceTrigger,
    last_tick: Option<TickReport>,

    last_redraw: Instant,
    fps: f32,
}

impl App {
    pub fn new(app_config: AppConfig, evolver_config: EvolverConfig, reference: ReferenceImage) -> Self {
        Self {
            state: None,
            app_config,
            evolver_config,
            reference,
            stop: Arc::new(AtomicBool::new(false)),
            error: None,
        }
    }

    /// The fatal error that ended the event loop, if any.
    pub fn take_error(&mut self) -> Option<EngineError> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: EngineError) {
        log::error!("{err}");
        self.error = Some(err);
        self.stop.store(true, Ordering::Relaxed);
        event_loop.exit();
    }

    fn init_state(&self, event_loop: &ActiveEventLoop) -> Result<AppState> {
        let (w, h) = self.app_config.window_size;
        let window_attrs = WindowAttributes::default()
            .with_title(self.app_config.title.as_str())
            .with_inner_size(winit::dpi::LogicalSize::new(w, h));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .map_err(|e| EngineError::Surface(e.to_string()))?,
        );

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| EngineError::Surface(e.to_string()))?;
        let (gpu, adapter) = pollster::block_on(GpuContext::for_surface(&instance, &surface))?;

        let size = window.inner_size();
        let mut surface_config = surface
            .get_default_config(&adapter, size.width.max(1), size.height.max(1))
            .ok_or_else(|| EngineError::Surface("surface unsupported by adapter".into()))?;
        // Canvas texels are shown as stored, without an sRGB encode on write.
        let caps = surface.get_capabilities(&adapter);
        if let Some(linear) = caps.formats.iter().copied().find(|f| !f.is_srgb()) {
            surface_config.format = linear;
        }
        surface.configure(&gpu.device, &surface_config);

        let evolver = Evolver::new(&gpu, self.evolver_config.clone(), &self.reference)?;
        let blit = CanvasBlit::new(&gpu.device, evolver.canvas(), surface_config.format);
        let hud = HudRenderer::new(&gpu.device, &gpu.queue, surface_config.format);

        Ok(AppState {
            gpu,
            surface,
            surface_config,
            window,
            evolver,
            blit,
            hud,
            trigger: AdvanceTrigger::new(self.app_config.auto_advance),
            last_tick: None,
            last_redraw: Instant::now(),
            fps: 0.0,
        })
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.init_state(event_loop) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                self.stop.store(true, Ordering::Relaxed);
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if handle_keyboard(state, &event) == KeyAction::Quit {
                    self.stop.store(true, Ordering::Relaxed);
                    event_loop.exit();
                }
            }

            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    state.surface_config.width = new_size.width;
                    state.surface_config.height = new_size.height;
                    state.surface.configure(&state.gpu.device, &state.surface_config);
                }
            }

            WindowEvent::RedrawRequested => {
                let clear = self.app_config.clear_color;
                if let Err(e) = redraw(state, &self.stop, clear) {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }
}

// ======================== Keyboard Handling ========================

#[derive(Debug, PartialEq, Eq)]
enum KeyAction {
    None,
    Quit,
}

fn handle_keyboard(state: &mut AppState, event: &KeyEvent) -> KeyAction {
    // Only fresh presses act; releases and auto-repeat are ignored.
    if !event.state.is_pressed() || event.repeat {
        return KeyAction::None;
    }

    match &event.logical_key {
        Key::Named(NamedKey::Escape) => return KeyAction::Quit,
        Key::Named(NamedKey::Space) => {
            state.trigger.toggle();
            log::info!(
                "Continuous refinement: {}",
                if state.trigger.running() { "ON" } else { "OFF" }
            );
        }
        Key::Named(NamedKey::Enter) => state.trigger.request_step(),
        Key::Character(c) if c.as_str().eq_ignore_ascii_case("s") => {
            let path = PathBuf::from(format!(
                "canvas_{}.png",
                Local::now().format("%Y%m%d_%H%M%S")
            ));
            if let Err(e) = state.evolver.canvas().save_png(&state.gpu, &path) {
                log::error!("Saving canvas failed: {e}");
            }
        }
        _ => {}
    }
    KeyAction::None
}

// ======================== Frame Rendering ========================

fn redraw(state: &mut AppState, stop: &AtomicBool, clear: [f64; 3]) -> Result<()> {
    let now = Instant::now();
    let dt = now.duration_since(state.last_redraw).as_secs_f32().max(0.0001);
    state.last_redraw = now;
    state.fps = state.fps * 0.95 + (1.0 / dt) * 0.05;

    // A tick blocks this frame until its final composite has landed.
    if state.trigger.take() {
        let report = state.evolver.run_tick(&state.gpu, stop)?;
        state.last_tick = Some(report);
    }

    let win_w = state.surface_config.width;
    let win_h = state.surface_config.height;
    state.hud.prepare(
        &state.gpu.device,
        &state.gpu.queue,
        &HudStatus {
            config: state.evolver.config(),
            last_tick: state.last_tick.as_ref(),
            running: state.trigger.running(),
            fps: state.fps,
        },
        win_w,
        win_h,
    );

    let output = match state.surface.get_current_texture() {
        Ok(t) => t,
        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
            state.surface.configure(&state.gpu.device, &state.surface_config);
            return Ok(());
        }
        Err(e) => {
            log::warn!("Surface error: {:?}", e);
            return Ok(());
        }
    };
    let view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = state
        .gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("display_encoder"),
        });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("display_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: clear[0],
                        g: clear[1],
                        b: clear[2],
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        state.blit.draw(&mut pass);
        state.hud.render(&mut pass);
    }
    state.gpu.queue.submit(std::iter::once(encoder.finish()));
    output.present();
    state.hud.trim();
    Ok(())
}
