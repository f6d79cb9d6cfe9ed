//! eframe application wrapping the tracer.

use std::path::PathBuf;

use super::surface::{EguiSurface, RfdPicker};
use crate::backend::gpu::WgpuBackend;
use crate::backend::PresentTarget;
use crate::settings::Settings;
use crate::tracer::{format_perf, scaled_size, Tracer};
use crate::{Error, Result};

/// Whether the render loop keeps going after a failed frame.
fn survives(e: &Error) -> bool {
    !e.is_fatal()
}

pub struct WavetraceApp {
    tracer: Option<Tracer<WgpuBackend>>,
    /// egui handles for the display textures, valid for `texture_generation`.
    textures: Vec<(PresentTarget, egui::TextureId)>,
    texture_generation: u64,
    show_overlay: bool,
    _trace_guard: Option<tracing_chrome::FlushGuard>,
}

impl WavetraceApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        scene: Option<PathBuf>,
        settings: Settings,
        trace_guard: Option<tracing_chrome::FlushGuard>,
    ) -> Result<Self> {
        let render_state = cc
            .wgpu_render_state
            .as_ref()
            .ok_or_else(|| Error::other("eframe was started without the wgpu renderer"))?;
        let backend = WgpuBackend::new(render_state.device.clone(), render_state.queue.clone());

        let ppp = cc.egui_ctx.pixels_per_point();
        let framebuffer = (
            (settings.window_width * ppp) as u32,
            (settings.window_height * ppp) as u32,
        );
        let start_dir = settings
            .default_scene
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let picker = Box::new(RfdPicker { start_dir });

        let tracer = Tracer::new(backend, settings, picker, scene.as_deref(), framebuffer)?;
        Ok(Self {
            tracer: Some(tracer),
            textures: Vec::new(),
            texture_generation: 0,
            show_overlay: true,
            _trace_guard: trace_guard,
        })
    }

    /// Run one tracer frame. Returns the target to draw.
    fn step(&mut self, ctx: &egui::Context, size: (u32, u32)) -> Option<PresentTarget> {
        let tracer = self.tracer.as_mut()?;

        // A window resize restarts accumulation like any other change.
        let params = &tracer.state().params;
        if scaled_size(size, tracer.settings().render_scale) != (params.width, params.height) {
            tracer.edit_params(|_| {});
        }

        let mut surface = EguiSurface::capture(ctx, size);
        match tracer.update(&mut surface) {
            Ok(()) => surface.presented,
            Err(e) if survives(&e) => {
                log::warn!("Frame failed, continuing: {e}");
                surface.presented
            }
            Err(e) => {
                log::error!("Render loop stopped: {e}");
                self.tracer = None;
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                None
            }
        }
    }

    fn texture_for(
        &mut self,
        render_state: &egui_wgpu::RenderState,
        target: PresentTarget,
    ) -> Option<egui::TextureId> {
        let backend = self.tracer.as_ref()?.backend();

        if backend.generation() != self.texture_generation {
            let mut renderer = render_state.renderer.write();
            for (_, id) in self.textures.drain(..) {
                renderer.free_texture(&id);
            }
            self.texture_generation = backend.generation();
        }
        if let Some((_, id)) = self.textures.iter().find(|(t, _)| *t == target) {
            return Some(*id);
        }

        let view = backend.target_view(target)?;
        let id = render_state.renderer.write().register_native_texture(
            &render_state.device,
            view,
            wgpu::FilterMode::Linear,
        );
        self.textures.push((target, id));
        Some(id)
    }

    fn overlay(&self, ui: &mut egui::Ui, rect: egui::Rect) {
        let Some(tracer) = &self.tracer else {
            return;
        };
        let state = tracer.state();
        let name = state
            .scene_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let lines = [
            format!("{name}  {:?}  iteration {}", state.pipeline, state.iteration),
            format!(
                "{:?} sampling, {:?} lighting, {} bounces",
                state.params.sampling_mode(),
                state.params.light_mode(),
                state.params.max_bounces
            ),
            format_perf(&tracer.perf()),
        ];
        let painter = ui.painter();
        let mut pos = rect.left_top() + egui::vec2(8.0, 8.0);
        for line in lines {
            painter.text(
                pos,
                egui::Align2::LEFT_TOP,
                line,
                egui::FontId::monospace(12.0),
                egui::Color32::from_gray(220),
            );
            pos.y += 16.0;
        }
    }
}

impl eframe::App for WavetraceApp {
    fn on_exit(&mut self) {
        let Some(mut tracer) = self.tracer.take() else {
            return;
        };
        tracer.finish();

        // Persist the recent list only; CLI overrides stay out of the file.
        let mut stored = Settings::load();
        stored.recent_files = tracer.settings().recent_files.clone();
        stored.save();
    }

    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let _span = tracing::info_span!("viewer_update").entered();

        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
        if ctx.input(|i| i.key_pressed(egui::Key::Tab)) {
            self.show_overlay = !self.show_overlay;
        }
        let Some(render_state) = frame.wgpu_render_state().cloned() else {
            return;
        };

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                let rect = ui.max_rect();
                let ppp = ctx.pixels_per_point();
                let size = (
                    (rect.width() * ppp).round().max(1.0) as u32,
                    (rect.height() * ppp).round().max(1.0) as u32,
                );

                if let Some(target) = self.step(ctx, size) {
                    if let Some(id) = self.texture_for(&render_state, target) {
                        ui.painter().image(
                            id,
                            rect,
                            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                            egui::Color32::WHITE,
                        );
                    }
                }
                if self.show_overlay {
                    self.overlay(ui, rect);
                }
            });

        ctx.request_repaint();
    }
}
