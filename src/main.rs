//! wavetrace - interactive GPU path tracer.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use wavetrace::backend::recording::RecordingBackend;
use wavetrace::backend::PipelineMode;
use wavetrace::settings::Settings;
use wavetrace::tracer::{HeadlessSurface, NoPicker, Tracer};

struct Options {
    scene: Option<PathBuf>,
    log_level: &'static str,
    megakernel: bool,
    scale: Option<f32>,
    dry_run: Option<u32>,
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let Some(opts) = parse_args(&args)? else {
        return Ok(());
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(opts.log_level))
        .format_timestamp(None)
        .init();

    let mut settings = Settings::load();
    if opts.megakernel {
        settings.pipeline = PipelineMode::Megakernel;
    }
    if let Some(scale) = opts.scale {
        settings.render_scale = scale;
        settings.validate();
    }

    if let Some(frames) = opts.dry_run {
        return dry_run(opts.scene, settings, frames);
    }
    run_viewer(opts.scene, settings)
}

/// `None` when the invocation only printed something.
fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let prog = args.first().map(String::as_str).unwrap_or("wavetrace");
    let mut opts = Options {
        scene: None,
        log_level: "info",
        megakernel: false,
        scale: None,
        dry_run: None,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => opts.log_level = "debug",
            "-vv" | "--trace" => opts.log_level = "trace",
            "-q" | "--quiet" => opts.log_level = "error",
            "--megakernel" => opts.megakernel = true,
            "--scale" => {
                let value = iter.next().context("--scale needs a value")?;
                opts.scale = Some(value.parse().with_context(|| format!("bad scale '{value}'"))?);
            }
            "--dry-run" => {
                let value = iter.next().context("--dry-run needs a frame count")?;
                opts.dry_run =
                    Some(value.parse().with_context(|| format!("bad frame count '{value}'"))?);
            }
            "--version" | "-V" => {
                println!(
                    "wavetrace {} (built {} {})",
                    env!("CARGO_PKG_VERSION"),
                    env!("WAVETRACE_BUILD_DATE"),
                    env!("WAVETRACE_BUILD_TIME")
                );
                return Ok(None);
            }
            "-h" | "--help" => {
                print_usage(prog);
                return Ok(None);
            }
            s if s.starts_with('-') => {
                print_usage(prog);
                bail!("unknown option: {s}");
            }
            s => {
                if opts.scene.is_some() {
                    bail!("only one scene may be given");
                }
                opts.scene = Some(PathBuf::from(s));
            }
        }
    }
    Ok(Some(opts))
}

fn print_usage(prog: &str) {
    println!("wavetrace - interactive GPU path tracer");
    println!();
    println!("Usage: {} [options] [scene.obj|scene.ply]", prog);
    println!();
    println!("Options:");
    println!("  -v, --verbose      Debug output");
    println!("  -vv, --trace       Trace output (very verbose)");
    println!("  -q, --quiet        Errors only");
    println!("  --megakernel       Start in megakernel mode");
    println!("  --scale <f>        Render scale relative to the window");
    println!("  --dry-run <n>      Run n frames headless and print the stage counts");
    println!("  -V, --version      Show version and build date");
}

#[cfg(feature = "viewer")]
fn run_viewer(scene: Option<PathBuf>, settings: Settings) -> Result<()> {
    wavetrace::viewer::run(scene, settings)
}

#[cfg(not(feature = "viewer"))]
fn run_viewer(_scene: Option<PathBuf>, _settings: Settings) -> Result<()> {
    bail!("built without the viewer feature; use --dry-run <frames>")
}

/// Drive the orchestrator against the recording backend.
fn dry_run(scene: Option<PathBuf>, settings: Settings, frames: u32) -> Result<()> {
    let size = (settings.window_width as u32, settings.window_height as u32);
    let mut tracer = Tracer::new(
        RecordingBackend::new(),
        settings,
        Box::new(NoPicker),
        scene.as_deref(),
        size,
    )?;
    let mut surface = HeadlessSurface::new(size.0, size.1);
    for _ in 0..frames {
        tracer.update(&mut surface)?;
    }
    tracer.finish();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for stage in tracer.backend().kernels() {
        *counts.entry(stage.name()).or_default() += 1;
    }
    let state = tracer.state();
    println!(
        "{} frames of {} ({:?}), iteration {}",
        frames,
        state.scene_path.display(),
        state.pipeline,
        state.iteration
    );
    for (name, count) in counts {
        println!("  {name:<16} {count}");
    }
    Ok(())
}
