//! Wall-clock timing for the full frame pipeline on synthetic input.
//!
//! Renders one marker into a flat frame, then runs the tracker over the
//! same buffer for a configurable number of iterations and reports
//! min / mean / p95 per-frame latency. Criterion covers statistical
//! comparisons; this harness is for quick eyeballing and for profiling
//! runs (`cargo build --profile profiling -p fidtrack-bench`).

use std::time::Instant;

use clap::Parser;

use fidtrack::render::{draw_marker_upright, Frame, MarkerArt};
use fidtrack::{
    Camera, Distortion, Intrinsics, MarkerMode, PatternGrid, TrackerOptions, TrackingEngine,
};

type BenchError = Box<dyn std::error::Error>;

#[derive(Parser, Debug)]
#[command(name = "frame_timing")]
#[command(about = "Time the marker tracking pipeline over a synthetic frame")]
struct Args {
    /// Timed iterations.
    #[arg(long, default_value_t = 200)]
    frames: usize,

    /// Untimed warmup iterations.
    #[arg(long, default_value_t = 20)]
    warmup: usize,

    /// Rendered marker edge length in pixels.
    #[arg(long, default_value_t = 120)]
    size: usize,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Track a registered 16x16 template instead of a binary-id marker.
    #[arg(long)]
    template: bool,

    /// Emit the summary as one JSON object on stdout.
    #[arg(long)]
    json: bool,

    /// Install the tracing subscriber instead of the plain logger.
    #[arg(long)]
    tracing: bool,
}

fn main() -> Result<(), BenchError> {
    let args = Args::parse();

    if args.tracing {
        fidtrack::init_tracing(false);
    } else {
        fidtrack::init_with_level(log::LevelFilter::Info)?;
    }

    if args.frames == 0 {
        return Err("--frames must be at least 1".into());
    }
    if args.size < 16 || args.size >= args.width.min(args.height) as usize {
        return Err("--size must fit inside the frame".into());
    }

    let camera = Camera {
        intrinsics: Intrinsics {
            fx: args.width as fidtrack::Real,
            fy: args.width as fidtrack::Real,
            cx: args.width as fidtrack::Real / 2.0,
            cy: args.height as fidtrack::Real / 2.0,
        },
        distortion: Distortion::default(),
        width: args.width,
        height: args.height,
        near: 1.0,
        far: 5000.0,
    };

    let options = if args.template {
        TrackerOptions::default()
    } else {
        TrackerOptions {
            marker_mode: MarkerMode::BinaryId { threshold: 128 },
            ..TrackerOptions::default()
        }
    };
    let mut engine = TrackingEngine::new(options)?;
    engine.set_camera(camera)?;

    let art = if args.template {
        let mut cells = [0u8; 256];
        for (i, c) in cells.iter_mut().enumerate() {
            *c = (i as u8).wrapping_mul(53);
        }
        engine.add_pattern(&cells, 16)?;
        MarkerArt::from_pattern(&PatternGrid::from_cells(cells), 0.25)
    } else {
        MarkerArt::from_binary_id(37, 0.25)
    }
    .ok_or("marker art rendering failed")?;

    let mut frame = Frame::filled(args.width as usize, args.height as usize, 255);
    let x = (args.width as usize - args.size) / 2;
    let y = (args.height as usize - args.size) / 2;
    draw_marker_upright(&mut frame, &art, x, y, args.size);

    // at least one untimed pass, so the marker sanity check below has a
    // frame to look at even with --warmup 0
    for _ in 0..args.warmup.max(1) {
        engine.calc(frame.data())?;
    }
    if engine.result().markers.is_empty() {
        return Err("warmup frames produced no markers; nothing worth timing".into());
    }

    let mut samples = Vec::with_capacity(args.frames);
    for _ in 0..args.frames {
        let started = Instant::now();
        engine.calc(frame.data())?;
        samples.push(started.elapsed().as_secs_f64() * 1e3);
    }
    samples.sort_by(|a, b| a.total_cmp(b));

    let min_ms = samples[0];
    let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
    let p95_ms = samples[((samples.len() as f64 * 0.95) as usize).min(samples.len() - 1)];
    let mode = if args.template { "template" } else { "binary_id" };

    if args.json {
        let summary = serde_json::json!({
            "mode": mode,
            "width": args.width,
            "height": args.height,
            "marker_px": args.size,
            "frames": args.frames,
            "min_ms": min_ms,
            "mean_ms": mean_ms,
            "p95_ms": p95_ms,
        });
        println!("{summary}");
    } else {
        println!(
            "{mode} {}x{} marker={}px frames={}",
            args.width, args.height, args.size, args.frames
        );
        println!("  min  {min_ms:8.3} ms");
        println!("  mean {mean_ms:8.3} ms");
        println!("  p95  {p95_ms:8.3} ms");
    }

    Ok(())
}
