//! face_veil - batch face anonymization
//!
//! Modes:
//! - image: writes `<output-dir>/Anonymized_image.jpg`
//! - video: writes `<output-dir>/Output.mp4`
//! - webcam: live preview window, no file output (requires feature: gui)
//!
//! With feature `gui` the image is shown once written and video frames are
//! shown while they are encoded; closing that window (or `Q`) stops the video
//! early and keeps what was encoded. `--no-preview` skips the windows.
//!
//! Without `--mode` (or `--file-path` for image/video) the values are read
//! interactively from stdin.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::io::{BufRead, IsTerminal, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use face_veil::detect::{DetectorFactory, DetectorSettings, FaceDetector};
use face_veil::pipeline::{process_image_file, transcode_file, VideoReport};
use face_veil::ui::{FrameProgress, Ui};
use face_veil::Frame;

const IMAGE_OUTPUT: &str = "Anonymized_image.jpg";
const VIDEO_OUTPUT: &str = "Output.mp4";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Image,
    Video,
    Webcam,
}

impl Mode {
    fn parse(input: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(input.trim(), true).ok()
    }

    /// Fixed output file for the mode; webcam mode writes nothing.
    fn output_file(self, output_dir: &Path) -> Option<PathBuf> {
        match self {
            Mode::Image => Some(output_dir.join(IMAGE_OUTPUT)),
            Mode::Video => Some(output_dir.join(VIDEO_OUTPUT)),
            Mode::Webcam => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Blur faces in images, videos and webcam feeds")]
struct Args {
    /// What to anonymize; prompted for when omitted.
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// Input image or video (relative paths resolve against the working directory).
    #[arg(long, value_name = "PATH")]
    file_path: Option<PathBuf>,
    /// Directory for anonymized output files.
    #[arg(long, default_value = "output", value_name = "DIR")]
    output_dir: PathBuf,
    /// Face detector backend (ultraface|none).
    #[arg(long, env = "FACE_VEIL_BACKEND", default_value = "ultraface")]
    backend: String,
    /// UltraFace ONNX model.
    #[arg(long, env = "FACE_VEIL_MODEL", default_value = "models/version-RFB-320.onnx")]
    model: PathBuf,
    /// Camera device for webcam mode.
    #[arg(long, env = "FACE_VEIL_CAMERA", default_value = "/dev/video0")]
    camera: String,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    /// Do not open preview windows for image and video modes.
    #[arg(long)]
    no_preview: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run(Args::parse()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());
    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    let mode = match args.mode {
        Some(mode) => mode,
        None => prompt_mode(&mut input)?,
    };
    let detectors = DetectorFactory::from_settings(&DetectorSettings {
        backend: args.backend.trim().to_lowercase(),
        model_path: args.model.clone(),
    })?;

    match mode {
        Mode::Image | Mode::Video => {
            let raw_path = match args.file_path.clone() {
                Some(path) => path,
                None => prompt_path(&mut input)?,
            };
            let input_path = resolve_input(&raw_path)?;
            std::fs::create_dir_all(&args.output_dir).with_context(|| {
                format!("create output directory {}", args.output_dir.display())
            })?;

            let mut detector = {
                let _stage = ui.stage("Load face detector");
                let mut detector = detectors.create()?;
                detector.warm_up()?;
                detector
            };

            let output = mode
                .output_file(&args.output_dir)
                .ok_or_else(|| anyhow!("{mode:?} mode writes no file"))?;
            if mode == Mode::Image {
                let faces = {
                    let _stage = ui.stage("Anonymize image");
                    process_image_file(&input_path, &output, detector.as_mut())?
                };
                println!("{} face(s) blurred -> {}", faces, output.display());
                if !args.no_preview {
                    preview_image(&output)?;
                }
            } else {
                let progress = ui.frames("Anonymize video");
                let report = if args.no_preview {
                    transcode(&input_path, &output, detector.as_mut(), progress, |_| {
                        ControlFlow::Continue(())
                    })?
                } else {
                    preview_video(input_path, output.clone(), detector, progress)?
                };
                if report.stopped_early {
                    println!("stopped early; kept the frames encoded so far");
                }
                println!(
                    "{} frame(s), {} face(s) blurred -> {}",
                    report.frames,
                    report.faces,
                    output.display()
                );
            }
            Ok(())
        }
        Mode::Webcam => run_webcam(&args.camera, &detectors),
    }
}

fn transcode(
    input: &Path,
    output: &Path,
    detector: &mut dyn FaceDetector,
    mut progress: FrameProgress,
    mut on_frame: impl FnMut(&Frame) -> ControlFlow<()>,
) -> Result<VideoReport> {
    let report = transcode_file(input, output, detector, |n, frame| {
        progress.set(n);
        on_frame(frame)
    })?;
    progress.finish(report.frames);
    Ok(report)
}

#[cfg(feature = "gui")]
fn preview_image(output: &Path) -> Result<()> {
    let frame = face_veil::ingest::load_image(output)?;
    if let Err(err) = face_veil::gui::show_image("Anonymized image", frame) {
        log::warn!("{:#}", err);
    }
    Ok(())
}

#[cfg(not(feature = "gui"))]
fn preview_image(_output: &Path) -> Result<()> {
    Ok(())
}

#[cfg(feature = "gui")]
fn preview_video(
    input: PathBuf,
    output: PathBuf,
    mut detector: Box<dyn FaceDetector>,
    progress: FrameProgress,
) -> Result<VideoReport> {
    face_veil::gui::run_with_preview("Anonymized video", move |slot| {
        transcode(&input, &output, detector.as_mut(), progress, |frame| {
            slot.publish(frame);
            if slot.abort_requested() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
    })
}

#[cfg(not(feature = "gui"))]
fn preview_video(
    input: PathBuf,
    output: PathBuf,
    mut detector: Box<dyn FaceDetector>,
    progress: FrameProgress,
) -> Result<VideoReport> {
    transcode(&input, &output, detector.as_mut(), progress, |_| {
        ControlFlow::Continue(())
    })
}

#[cfg(feature = "gui")]
fn run_webcam(device: &str, detectors: &DetectorFactory) -> Result<()> {
    use face_veil::camera::CameraManager;
    use face_veil::ingest::CameraSettings;

    let camera = CameraManager::from_settings(CameraSettings {
        device: device.to_string(),
        ..CameraSettings::default()
    });
    face_veil::gui::run_webcam_preview(camera, detectors.create()?)
}

#[cfg(not(feature = "gui"))]
fn run_webcam(_device: &str, _detectors: &DetectorFactory) -> Result<()> {
    Err(face_veil::Error::Unsupported("webcam preview", "gui").into())
}

fn prompt_mode(input: &mut impl BufRead) -> Result<Mode> {
    loop {
        let line = prompt_line(input, "Mode (image, video, webcam): ")?;
        match Mode::parse(&line) {
            Some(mode) => return Ok(mode),
            None => eprintln!("Unknown mode '{}'", line.trim()),
        }
    }
}

fn prompt_path(input: &mut impl BufRead) -> Result<PathBuf> {
    loop {
        let line = prompt_line(input, "File path: ")?;
        let line = line.trim();
        if !line.is_empty() {
            return Ok(PathBuf::from(line));
        }
    }
}

fn prompt_line(input: &mut impl BufRead, prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(anyhow!("no input provided"));
    }
    Ok(line)
}

fn resolve_input(path: &Path) -> Result<PathBuf> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    if !resolved.is_file() {
        return Err(anyhow!("input file not found: {}", resolved.display()));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_have_fixed_names() {
        let dir = Path::new("out");
        assert_eq!(
            Mode::Image.output_file(dir),
            Some(PathBuf::from("out/Anonymized_image.jpg"))
        );
        assert_eq!(Mode::Video.output_file(dir), Some(PathBuf::from("out/Output.mp4")));
        assert_eq!(Mode::Webcam.output_file(dir), None);
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(Mode::parse(" Video\n"), Some(Mode::Video));
        assert_eq!(Mode::parse("WEBCAM"), Some(Mode::Webcam));
        assert_eq!(Mode::parse("webcamq"), None);
    }

    #[test]
    fn prompt_fails_on_end_of_input() {
        let mut empty: &[u8] = b"";
        assert!(prompt_mode(&mut empty).is_err());
        let mut retry: &[u8] = b"audio\nimage\n";
        assert_eq!(prompt_mode(&mut retry).expect("second answer"), Mode::Image);
    }
}
