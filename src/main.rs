//! Cam-capture binary for testing camera capture.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use cam_capture::{AutoBrightness, Backend, CameraSource, CaptureConfig, CaptureStatus};
use clap::Parser;
use log::{error, info, warn};

/// Auto-brightness feedback target.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum AutoBrightnessArg {
    /// No feedback
    Off,
    /// Drive the brightness control
    Brightness,
    /// Drive the exposure control
    Exposure,
    /// Drive the absolute exposure control
    ExposureAbsolute,
}

impl From<AutoBrightnessArg> for AutoBrightness {
    fn from(arg: AutoBrightnessArg) -> Self {
        match arg {
            AutoBrightnessArg::Off => Self::Off,
            AutoBrightnessArg::Brightness => Self::Brightness,
            AutoBrightnessArg::Exposure => Self::Exposure,
            AutoBrightnessArg::ExposureAbsolute => Self::ExposureAbsolute,
        }
    }
}

/// Capture normalized frames from one camera and print per-frame stats.
///
/// A device path selects the kernel video node backend; `camera0` selects
/// the camera-stack backend.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kernel node path (e.g. /dev/video0) or camera-stack slot (camera0)
    #[arg(short, long, env = "CAMERA", default_value = "/dev/video0")]
    device: String,

    /// Requested width; rounded up to a multiple of 8
    #[arg(long, env = "CAMERA_WIDTH", default_value_t = 640)]
    width: u32,

    /// Requested height; rounded up to a multiple of 8
    #[arg(long, env = "CAMERA_HEIGHT", default_value_t = 480)]
    height: u32,

    /// Requested frames per second
    #[arg(long, env = "CAMERA_FPS", default_value_t = 15)]
    framerate: u32,

    /// Preferred palette index
    #[arg(long, env = "CAMERA_PALETTE", default_value_t = 17)]
    palette: usize,

    /// Video input to select
    #[arg(long, env = "CAMERA_INPUT")]
    input: Option<u32>,

    /// Buffers to request
    #[arg(long, env = "CAMERA_BUFFERS", default_value_t = 4)]
    buffers: u32,

    /// Control directives, e.g. "brightness=120, contrast=40"
    #[arg(long, env = "CAMERA_PARAMS", default_value = "")]
    params: String,

    /// Auto-brightness feedback target
    #[arg(long, env = "AUTO_BRIGHTNESS", default_value = "off", value_enum)]
    auto_brightness: AutoBrightnessArg,

    /// Number of frames to capture
    #[arg(short = 'n', long, default_value_t = 30)]
    frames: u32,
}

impl Args {
    fn config(&self) -> CaptureConfig {
        let backend = if self.device.starts_with('/') {
            Backend::V4l2 {
                device: PathBuf::from(&self.device),
            }
        } else {
            Backend::Libcamera {
                device: self.device.clone(),
            }
        };
        CaptureConfig {
            backend,
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            palette: self.palette,
            input: self.input,
            buffer_count: self.buffers,
            params: self.params.clone(),
            auto_brightness: self.auto_brightness.into(),
            ..CaptureConfig::default()
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> cam_capture::Result<()> {
    let config = args.config();
    let mut source = CameraSource::open(&config)?;
    info!("Capturing {} frames at {}", args.frames, source.geometry());

    let mut frame = Vec::new();
    let mut captured = 0;
    let mut misses = 0u32;
    let started = Instant::now();
    while captured < args.frames {
        match source.next(&mut frame) {
            CaptureStatus::Success => {
                captured += 1;
                let geometry = source.geometry();
                let luma = frame.get(..geometry.motion_size()).unwrap_or_default();
                let average = luma.iter().map(|&y| u64::from(y)).sum::<u64>() / luma.len().max(1) as u64;
                println!(
                    "Frame {captured}: {geometry}, {} bytes, average luma {average}",
                    frame.len()
                );
            }
            CaptureStatus::RetryableMiss => misses += 1,
            CaptureStatus::Fatal => warn!("Device lost, reconnecting"),
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "Captured {captured} frames in {elapsed:.2}s ({:.1} fps), {misses} missed",
        f64::from(captured) / elapsed.max(f64::EPSILON)
    );
    Ok(())
}
