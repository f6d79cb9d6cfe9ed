//! Interactive window: eframe/egui over a wgpu device shared with the tracer.

mod app;
mod surface;

pub use surface::{EguiSurface, RfdPicker};

use std::path::PathBuf;

use anyhow::Result;
use tracing_subscriber::prelude::*;

use crate::settings::Settings;

/// Open the window and render until it is closed.
///
/// Logging must already be initialized by the caller.
pub fn run(scene: Option<PathBuf>, settings: Settings) -> Result<()> {
    let trace_guard = init_tracing();

    std::panic::set_hook(Box::new(|info| {
        let msg = info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
            .or_else(|| info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("Unknown error");

        if msg.contains("wgpu") || msg.contains("Buffer") || msg.contains("shader") {
            eprintln!("\n[GPU Error] {}", msg);
            eprintln!("\nThe device rejected a kernel or buffer. Check the adapter limits with -vv.");
        } else {
            eprintln!("\n[Error] {}", msg);
            if let Some(loc) = info.location() {
                eprintln!("  at {}:{}:{}", loc.file(), loc.line(), loc.column());
            }
        }
    }));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([settings.window_width, settings.window_height])
            .with_title("wavetrace"),
        renderer: eframe::Renderer::Wgpu,
        wgpu_options: egui_wgpu::WgpuConfiguration {
            wgpu_setup: egui_wgpu::WgpuSetup::CreateNew(egui_wgpu::WgpuSetupCreateNew {
                device_descriptor: std::sync::Arc::new(|adapter| {
                    // Path state is 80 bytes per pixel; full-HD needs more
                    // than the default 128 MiB binding.
                    let adapter_limits = adapter.limits();
                    log::debug!("Adapter: {:?}", adapter.get_info());
                    wgpu::DeviceDescriptor {
                        label: Some("wavetrace device"),
                        required_limits: wgpu::Limits {
                            max_storage_buffer_binding_size: adapter_limits
                                .max_storage_buffer_binding_size,
                            max_buffer_size: adapter_limits.max_buffer_size,
                            ..wgpu::Limits::default()
                        },
                        ..Default::default()
                    }
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    };

    eframe::run_native(
        "wavetrace",
        options,
        Box::new(move |cc| {
            let app = app::WavetraceApp::new(cc, scene, settings, trace_guard)?;
            Ok(Box::new(app))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run: {}", e))
}

fn init_tracing() -> Option<tracing_chrome::FlushGuard> {
    if std::env::var("WAVETRACE_TRACE").ok().as_deref() != Some("1") {
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();

    let subscriber = tracing_subscriber::registry().with(chrome_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }

    Some(guard)
}
