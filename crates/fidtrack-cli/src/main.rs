//! fidtrack CLI — detect square fiducial markers in images and render
//! printable marker sheets.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use image::imageops::{resize, FilterType};
use image::{ImageBuffer, ImageReader, Luma};

use fidtrack::core::{bitcode::BITCODE_IDS, DEFAULT_FAR_CLIP, DEFAULT_NEAR_CLIP, PATTERN_GRID};
use fidtrack::render::{draw_marker_upright, Frame, MarkerArt};
use fidtrack::{
    Camera, Distortion, FrameResult, ImageView, Intrinsics, MarkerMode, PatternGrid, PixelFormat,
    Real, TrackerOptions, TrackingEngine, DEFAULT_BIT_THRESHOLD,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fidtrack")]
#[command(about = "Detect square fiducial markers (template or binary-id) and report their poses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect markers in an image.
    Detect(DetectArgs),

    /// Render a marker as an image file, ready for printing.
    Generate(GenerateArgs),

    /// Print a camera calibration template (JSON) to fill in.
    CameraTemplate(CameraTemplateArgs),
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Path to the input image (anything the `image` crate decodes).
    #[arg(long)]
    image: PathBuf,

    /// Camera calibration JSON (see `camera-template`). Without it the
    /// detector reports ids and corners only, never poses.
    #[arg(long)]
    camera: Option<PathBuf>,

    /// Tracker options JSON; missing fields keep their defaults.
    #[arg(long)]
    options: Option<PathBuf>,

    /// Decode self-identifying binary markers instead of matching
    /// registered templates.
    #[arg(long)]
    binary: bool,

    /// Register a template image (square, repeatable). Ids are assigned
    /// in argument order starting at 0.
    #[arg(long = "pattern")]
    patterns: Vec<PathBuf>,

    /// Override the binarization threshold (0-255).
    #[arg(long)]
    threshold: Option<u8>,

    /// Retry with alternative thresholds when a frame yields nothing.
    #[arg(long)]
    auto_threshold: bool,

    /// Path to write detection results (JSON); stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct GenerateArgs {
    /// Binary marker id to render.
    #[arg(long, conflicts_with = "pattern")]
    id: Option<u32>,

    /// Template image (square) to wrap in a marker border.
    #[arg(long)]
    pattern: Option<PathBuf>,

    /// Marker edge length in pixels, border included.
    #[arg(long, default_value_t = 480)]
    size: usize,

    /// Border thickness as a fraction of the marker edge.
    #[arg(long, default_value_t = 0.25)]
    border: f64,

    /// White quiet zone around the marker, in pixels.
    #[arg(long, default_value_t = 40)]
    margin: usize,

    /// Path to write the rendered marker (format from the extension).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CameraTemplateArgs {
    /// Calibrated frame width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Calibrated frame height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,
}

fn main() -> CliResult<()> {
    fidtrack::init_with_level(log::LevelFilter::Info)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => run_detect(&args),
        Commands::Generate(args) => run_generate(&args),
        Commands::CameraTemplate(args) => run_camera_template(&args),
    }
}

// ── detect ─────────────────────────────────────────────────────────────

fn run_detect(args: &DetectArgs) -> CliResult<()> {
    let gray = load_gray(&args.image)?;
    let (width, height) = gray.dimensions();
    log::info!("loaded {} ({width}x{height})", args.image.display());

    let mut options: TrackerOptions = match &args.options {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => {
            let mut defaults = TrackerOptions::default();
            // the video-frame area gate would reject markers on a
            // print-resolution still
            defaults.quad.max_area = defaults.quad.max_area.max(width as Real * height as Real);
            defaults
        }
    };
    // The decoded input is always 8-bit grayscale, whatever the file held.
    options.pixel_format = PixelFormat::Luma;
    if args.binary {
        options.marker_mode = MarkerMode::BinaryId {
            threshold: DEFAULT_BIT_THRESHOLD,
        };
    }
    if let Some(threshold) = args.threshold {
        options.threshold = threshold;
    }
    if args.auto_threshold {
        options.auto_threshold = true;
    }
    if args.patterns.is_empty() && matches!(options.marker_mode, MarkerMode::Template) {
        return Err("template matching needs at least one --pattern; or pass --binary".into());
    }

    let mut engine = TrackingEngine::new(options)?;
    for path in &args.patterns {
        let id = register_pattern(&mut engine, path)?;
        log::info!("registered {} as pattern {id}", path.display());
    }

    let result = match &args.camera {
        Some(path) => {
            let parsed: Camera = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            let camera = if (parsed.width, parsed.height) == (width, height) {
                parsed
            } else {
                log::warn!(
                    "camera calibrated for {}x{}, rescaling to {width}x{height}",
                    parsed.width,
                    parsed.height
                );
                parsed.resized(width, height)?
            };
            engine.set_camera(camera)?;
            engine.calc(gray.as_raw())?.clone()
        }
        None => {
            let view = ImageView::new(
                gray.as_raw(),
                width as usize,
                height as usize,
                PixelFormat::Luma,
            )?;
            engine.detect_only(&view)
        }
    };

    report(&result, args.out.as_deref())
}

fn register_pattern(engine: &mut TrackingEngine, path: &Path) -> CliResult<u32> {
    let img = load_gray(path)?;
    let (w, h) = img.dimensions();
    if w != h {
        return Err(format!("pattern {} must be square, got {w}x{h}", path.display()).into());
    }
    let grid = PATTERN_GRID as u32;
    if w % grid == 0 {
        return Ok(engine.add_pattern(img.as_raw(), w as usize)?);
    }
    // The store wants a side divisible by its grid; resample once when
    // the input is not.
    let side = ((w + grid / 2) / grid).max(1) * grid;
    let resampled = resize(&img, side, side, FilterType::Triangle);
    Ok(engine.add_pattern(resampled.as_raw(), side as usize)?)
}

fn report(result: &FrameResult, out: Option<&Path>) -> CliResult<()> {
    let ids: Vec<u32> = result.markers.iter().map(|m| m.id).collect();
    log::info!(
        "{} candidate quads, {} markers {ids:?}",
        result.candidates,
        result.markers.len()
    );

    let json = serde_json::to_string_pretty(result)?;
    match out {
        Some(path) => {
            std::fs::write(path, &json)?;
            log::info!("results written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ── generate ───────────────────────────────────────────────────────────

fn run_generate(args: &GenerateArgs) -> CliResult<()> {
    if !(args.border > 0.0 && args.border < 0.5) {
        return Err("--border must lie in (0, 0.5)".into());
    }
    let border = args.border as Real;

    let art = match (args.id, &args.pattern) {
        (Some(id), None) => MarkerArt::from_binary_id(id, border)
            .ok_or_else(|| format!("binary ids run from 0 to {}", BITCODE_IDS - 1))?,
        (None, Some(path)) => {
            let img = load_gray(path)?;
            let (w, h) = img.dimensions();
            if w != h {
                return Err(
                    format!("pattern {} must be square, got {w}x{h}", path.display()).into(),
                );
            }
            let small = resize(&img, PATTERN_GRID as u32, PATTERN_GRID as u32, FilterType::Triangle);
            let cells: [u8; PATTERN_GRID * PATTERN_GRID] = small
                .into_raw()
                .try_into()
                .map_err(|_| "resampled pattern has the wrong cell count")?;
            MarkerArt::from_pattern(&PatternGrid::from_cells(cells), border)
                .ok_or("marker art rendering failed")?
        }
        _ => return Err("pass exactly one of --id or --pattern".into()),
    };

    if args.size < art.side() {
        return Err(format!(
            "--size {} cannot resolve the {}-cell marker grid",
            args.size,
            art.side()
        )
        .into());
    }

    let side = args.size + 2 * args.margin;
    let mut frame = Frame::filled(side, side, 255);
    draw_marker_upright(&mut frame, &art, args.margin, args.margin, args.size);

    let img =
        ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(side as u32, side as u32, frame.data().to_vec())
            .ok_or("marker raster does not fit the output buffer")?;
    img.save(&args.out)?;
    log::info!("wrote {side}x{side} marker to {}", args.out.display());
    Ok(())
}

// ── camera-template ────────────────────────────────────────────────────

fn run_camera_template(args: &CameraTemplateArgs) -> CliResult<()> {
    let camera = Camera {
        intrinsics: Intrinsics {
            fx: args.width as Real,
            fy: args.width as Real,
            cx: args.width as Real / 2.0,
            cy: args.height as Real / 2.0,
        },
        distortion: Distortion::default(),
        width: args.width,
        height: args.height,
        near: DEFAULT_NEAR_CLIP,
        far: DEFAULT_FAR_CLIP,
    };
    println!("{}", serde_json::to_string_pretty(&camera)?);
    Ok(())
}

// ── shared ─────────────────────────────────────────────────────────────

fn load_gray(path: &Path) -> CliResult<image::GrayImage> {
    Ok(ImageReader::open(path)?.decode()?.to_luma8())
}
