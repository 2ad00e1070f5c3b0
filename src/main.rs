//! fli-capture binary: list FLI cameras, print their details, capture a frame.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use image::{ImageBuffer, Luma};
use log::{info, LevelFilter};

use fli_camera::{
    BitDepth, CaptureConfig, Device, FliCamera, FliLibrary, Frame, FrameType, LoadOptions,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture frames from FLI USB CCD cameras", long_about = None)]
struct Args {
    /// Path to the libfli shared library.
    #[arg(long)]
    library: Option<PathBuf>,

    /// Turn on the vendor library's own diagnostics.
    #[arg(long)]
    library_debug: bool,

    /// List attached cameras and exit.
    #[arg(long)]
    list: bool,

    /// Print camera details as JSON and exit.
    #[arg(long)]
    info: bool,

    /// Index of the camera to use, in enumeration order.
    #[arg(long, default_value_t = 0)]
    camera: usize,

    /// JSON capture configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exposure time in milliseconds.
    #[arg(long)]
    exposure_ms: Option<u64>,

    /// Frame type: normal, dark or rbi_flush.
    #[arg(long)]
    frame_type: Option<FrameType>,

    /// Binning factor, applied to both axes.
    #[arg(long)]
    bin: Option<i64>,

    /// Readout depth: 8bit or 16bit.
    #[arg(long)]
    bit_depth: Option<BitDepth>,

    /// CCD flushes before the exposure (0-16).
    #[arg(long)]
    flushes: Option<i64>,

    /// Cooler setpoint in degrees Celsius.
    #[arg(long, allow_hyphen_values = true)]
    temperature: Option<f64>,

    /// Write the captured frame to this PNG file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn capture_config(&self) -> Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load(path)?,
            None => CaptureConfig::default(),
        };
        if let Some(exposure_ms) = self.exposure_ms {
            config.exposure_ms = exposure_ms;
        }
        if let Some(frame_type) = self.frame_type {
            config.frame_type = frame_type;
        }
        if let Some(bin) = self.bin {
            config = config.with_binning(bin, bin);
        }
        if let Some(bit_depth) = self.bit_depth {
            config.bit_depth = bit_depth;
        }
        if let Some(flushes) = self.flushes {
            config.flushes = flushes;
        }
        if let Some(celsius) = self.temperature {
            config.temperature = Some(celsius);
        }
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(err) = run(&args) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn run(args: &Args) -> Result<()> {
    let mut options = LoadOptions::default().with_debug(args.library_debug);
    if let Some(path) = &args.library {
        options = options.with_path(path);
    }
    let sdk = FliLibrary::init(&options)?;
    info!("{}", sdk.version()?);

    if args.list {
        for (index, descriptor) in Device::enumerate(sdk, FliCamera::DOMAIN)?
            .iter()
            .enumerate()
        {
            println!("{index}: {descriptor}");
        }
        return Ok(());
    }

    let mut cameras = FliCamera::find_cameras(sdk)?;
    if args.camera >= cameras.len() {
        bail!(
            "camera index {} out of range, {} camera(s) attached",
            args.camera,
            cameras.len()
        );
    }
    let mut camera = cameras.swap_remove(args.camera);
    drop(cameras);

    if args.info {
        print_info(&camera)?;
        return Ok(());
    }

    let config = args.capture_config()?;
    camera.configure(&config)?;
    let frame = camera.capture()?;
    if let Some(stats) = frame.stats() {
        info!(
            "captured {}x{} frame: min {}, max {}, mean {:.1}",
            frame.width(),
            frame.height(),
            stats.min,
            stats.max,
            stats.mean
        );
    }

    if let Some(path) = &args.output {
        save_png(&frame, path)?;
        info!("saved {}", path.display());
    }
    Ok(())
}

fn print_info(camera: &FliCamera) -> Result<()> {
    let report = serde_json::json!({
        "device": camera.device().descriptor(),
        "model": camera.device().model()?,
        "info": camera.info()?,
        "camera_mode": camera.camera_mode()?,
        "camera_modes": camera.camera_modes()?,
        "temperature": camera.temperature()?,
        "cooler_power": camera.cooler_power()?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    let width = u32::try_from(frame.width()).context("frame too wide for PNG")?;
    let height = u32::try_from(frame.height()).context("frame too tall for PNG")?;
    match frame {
        Frame::Mono8(pixels) => {
            let data = pixels.iter().copied().collect();
            ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, data)
                .context("pixel buffer does not match frame size")?
                .save(path)
        }
        Frame::Mono16(pixels) => {
            let data = pixels.iter().copied().collect();
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, data)
                .context("pixel buffer does not match frame size")?
                .save(path)
        }
    }
    .with_context(|| format!("failed to write {}", path.display()))
}
