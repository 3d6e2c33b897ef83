//! Wavefront CLI - render the built-in test scenes headless.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wavefront::prelude::*;
use wavefront::render::{BUILD_DATE, BUILD_PROFILE, BUILD_TIME};

/// Options of the `render` command.
#[derive(Debug)]
struct RenderArgs {
    width: u32,
    height: u32,
    spp: u32,
    frames: u32,
    filter: bool,
    taa: bool,
    async_mode: bool,
    gpu: bool,
    scene: String,
    out: PathBuf,
    config: Option<PathBuf>,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            spp: 1,
            frames: 16,
            filter: false,
            taa: false,
            async_mode: false,
            gpu: false,
            scene: "cornell".into(),
            out: PathBuf::from("render.exr"),
            config: None,
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "warn",
            _ => filtered_args.push(arg),
        }
    }
    let _guard = init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "render" | "r" => parse_render(&filtered_args[1..]).and_then(cmd_render),
        "info" | "i" => cmd_info(filtered_args.get(1).map(Path::new)),
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// fmt output filtered by `RUST_LOG` (or the -v/-q level), plus a Chrome
/// trace in `trace.json` when `WAVEFRONT_TRACE=1`.
fn init_tracing(level: &str) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (chrome_layer, guard) = if env::var("WAVEFRONT_TRACE").ok().as_deref() == Some("1") {
        let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new().file("trace.json").build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(chrome_layer)
        .init();
    guard
}

fn parse_render(args: &[&str]) -> anyhow::Result<RenderArgs> {
    let mut out = RenderArgs::default();
    let mut it = args.iter();
    while let Some(&arg) = it.next() {
        let mut value = |name: &str| next_value(&mut it, name);
        match arg {
            "--width" | "-w" => out.width = value(arg)?.parse().context("--width")?,
            "--height" | "-h" => out.height = value(arg)?.parse().context("--height")?,
            "--spp" => out.spp = value(arg)?.parse().context("--spp")?,
            "--frames" | "-f" => out.frames = value(arg)?.parse().context("--frames")?,
            "--scene" => out.scene = value(arg)?.to_string(),
            "--out" | "-o" => out.out = PathBuf::from(value(arg)?),
            "--config" | "-c" => out.config = Some(PathBuf::from(value(arg)?)),
            "--filter" => out.filter = true,
            "--taa" => out.taa = true,
            "--async" => out.async_mode = true,
            "--gpu" => out.gpu = true,
            other => bail!("unknown render option: {other}"),
        }
    }
    if out.width == 0 || out.height == 0 {
        bail!("target size must be non-zero");
    }
    Ok(out)
}

fn next_value<'a>(it: &mut std::slice::Iter<'_, &'a str>, name: &str) -> anyhow::Result<&'a str> {
    it.next().copied().with_context(|| format!("missing value for {name}"))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CoreConfig> {
    Ok(match path {
        Some(p) => CoreConfig::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => CoreConfig::from_env(),
    })
}

fn init_core(config: CoreConfig, gpu: bool) -> anyhow::Result<RenderCore> {
    if gpu {
        #[cfg(feature = "gpu")]
        return Ok(RenderCore::init_gpu(config)?);
        #[cfg(not(feature = "gpu"))]
        bail!("GPU tracer not available. Rebuild with: cargo build --features gpu");
    }
    Ok(RenderCore::init(config)?)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut core = init_core(config, args.gpu)?;
    if args.filter {
        core.setting("filter", 1.0)?;
    }
    if args.taa {
        core.setting("TAA", 1.0)?;
    }
    core.set_target(args.width, args.height, args.spp)?;

    let scene = match args.scene.as_str() {
        "cornell" => DemoScene::cornell_box(),
        "triangle" => DemoScene::single_triangle(),
        other => bail!("unknown scene: {other} (expected cornell or triangle)"),
    };
    scene.apply(&mut core)?;
    let view = scene.camera(args.width as f32 / args.height as f32);

    let start = Instant::now();
    for frame in 0..args.frames {
        let convergence = if frame == 0 { Convergence::Restart } else { Convergence::Converge };
        core.render(&view, convergence, args.async_mode)?;
        core.wait_for_render()?;
    }
    let elapsed = start.elapsed();

    let stats = core.stats();
    info!(
        frames = args.frames,
        samples = stats.samples_taken,
        elapsed_ms = elapsed.as_secs_f64() * 1e3,
        rays = stats.total_rays,
        shadow_rays = stats.total_shadow_rays,
        flushes = stats.overflow_flushes,
        "render done"
    );
    print_stats(&stats);

    let display = core.display().context("no display image")?;
    write_image(&args.out, args.width, args.height, display)?;
    println!("Wrote {}", args.out.display());
    Ok(())
}

fn write_image(path: &Path, width: u32, height: u32, pixels: &[glam::Vec4]) -> anyhow::Result<()> {
    let data: Vec<f32> = pixels.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
    let img = image::Rgb32FImage::from_raw(width, height, data).context("display size mismatch")?;
    img.save(path).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn print_stats(s: &CoreStats) {
    let ms = |d: std::time::Duration| d.as_secs_f64() * 1e3;
    println!("Device:        {} ({})", s.device.name, s.device.backend);
    println!("Samples:       {}", s.samples_taken);
    println!(
        "Rays:          {} primary, {} bounce 1, {} deeper, {} shadow",
        s.primary_rays, s.bounce1_rays, s.deep_rays, s.total_shadow_rays
    );
    println!(
        "Trace:         {:.2} ms primary, {:.2} ms bounce 1, {:.2} ms deeper",
        ms(s.trace_time_primary),
        ms(s.trace_time_bounce1),
        ms(s.trace_time_deep)
    );
    println!("Shade:         {:.2} ms", ms(s.shade_time));
    println!("Shadow:        {:.2} ms ({} dispatches, {} flushes)", ms(s.shadow_trace_time), s.shadow_dispatches, s.overflow_flushes);
    println!("Filter:        {:.2} ms", ms(s.filter_time));
    println!("Frame:         {:.2} ms render, {:.2} ms overhead", ms(s.render_time), ms(s.frame_overhead));
}

fn cmd_info(config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let core = RenderCore::init(CoreConfig {
        async_worker: false,
        ..config
    })?;
    let device = core.device_info();
    println!("wavefront {} ({BUILD_PROFILE}, built {BUILD_DATE} {BUILD_TIME})", env!("CARGO_PKG_VERSION"));
    println!("Device:        {}", device.name);
    println!("Backend:       {}", device.backend);
    println!("Compute units: {}", device.compute_units);
    if device.memory_mib > 0 {
        println!("Memory:        {} MiB", device.memory_mib);
    }
    Ok(())
}

fn print_help() {
    println!("wavefront - wavefront path tracer core");
    println!();
    println!("USAGE:");
    println!("    wavefront [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    r, render [render options]    Render a built-in scene to an image");
    println!("    i, info   [config.json]       Show the compute device");
    println!("    h, help                       Show this help");
    println!();
    println!("RENDER OPTIONS:");
    println!("    -w, --width <W>       Target width (default 320)");
    println!("    -h, --height <H>      Target height (default 240)");
    println!("    --spp <N>             Samples per pixel per frame (default 1)");
    println!("    -f, --frames <F>      Frames to accumulate (default 16)");
    println!("    --scene <name>        cornell | triangle (default cornell)");
    println!("    --filter              Enable the reprojection filter");
    println!("    --taa                 Enable temporal blending");
    println!("    --async               Render frames on the worker thread");
    println!("    --gpu                 Trace rays with wgpu (gpu feature)");
    println!("    -o, --out <file>      Output image, .exr or .hdr (default render.exr)");
    println!("    -c, --config <file>   JSON core config (default: $WAVEFRONT_CONFIG)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only warnings and errors");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG             Log filter, overrides -v/-q");
    println!("    WAVEFRONT_TRACE=1    Write a Chrome trace to trace.json");
    println!();
    println!("EXAMPLES:");
    println!("    wavefront render --frames 64 -o box.exr");
    println!("    wavefront render --filter --taa --async -o denoised.hdr");
    println!("    wavefront -v info");
}
