mod config;
mod engine;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use posekit_core::{
    classify, BoundingBox, CaptureControl, CaptureEvent, CompletedEnrollment, Detection, FaceLandmarks,
    GalleryMatcher, IdentityHint, LoopOutcome, MatchService, MatchedItem, PoseState, PoseVerdict,
};
use posekit_hw::Camera;
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "posekit", about = "Guided multi-pose face capture")]
struct Cli {
    /// TOML configuration file (POSEKIT_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture center, left and right poses and look up matches
    Enroll {
        /// Name of the person being enrolled
        #[arg(short, long)]
        name: String,
        /// Optional contact detail passed along with the descriptors
        #[arg(long)]
        contact: Option<String>,
        /// Only capture on Enter (disable hold-to-capture)
        #[arg(long)]
        manual: bool,
        /// Write the center-pose preview PNG here
        #[arg(long)]
        preview_out: Option<PathBuf>,
        /// Print the result as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Classify a pose from landmark x coordinates (no camera)
    Pose {
        #[arg(long, allow_negative_numbers = true)]
        left_eye: f32,
        #[arg(long, allow_negative_numbers = true)]
        right_eye: f32,
        #[arg(long, allow_negative_numbers = true)]
        nose: f32,
        /// Target pose: center, left or right
        #[arg(long, default_value = "center")]
        target: PoseState,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Number of frames to capture
        #[arg(long, default_value_t = 10)]
        frames: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll {
            name,
            contact,
            manual,
            preview_out,
            json,
        } => {
            let identity = IdentityHint { name, contact };
            enroll(&config, identity, manual, preview_out.as_deref(), json).await?;
        }
        Commands::Pose {
            left_eye,
            right_eye,
            nose,
            target,
        } => {
            let detection = detection_from_x(left_eye, right_eye, nose);
            let reading = classify(Some(&detection), target, &config.thresholds);
            match reading.deviation {
                Some(d) => println!("deviation: {d:+.3}"),
                None => println!("deviation: undefined (eyes coincide)"),
            }
            println!("target:    {}", target.label());
            match reading.verdict {
                PoseVerdict::Satisfied(_) => println!("verdict:   satisfied"),
                PoseVerdict::NotSatisfied(_, _) => println!("verdict:   not satisfied"),
            }
            println!("guidance:  {}", reading.guidance());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { frames } => {
            camera_test(&config.camera_device, frames)?;
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct EnrollReport<'a> {
    session_id: String,
    name: &'a str,
    completed_at: String,
    matches: &'a [MatchedItem],
}

async fn enroll(
    config: &Config,
    identity: IdentityHint,
    manual: bool,
    preview_out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let mut engine = engine::spawn_enrollment(config, identity, manual)?;
    let control = engine.control().clone();
    spawn_keyboard(control.clone());

    let auto = config.auto_capture && !manual;
    let hint = if auto {
        "Hold each pose to capture, or press Enter. Type q + Enter to cancel."
    } else {
        "Press Enter to capture each pose. Type q + Enter to cancel."
    };
    status(json, hint);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last_text: Option<&'static str> = None;

    loop {
        tokio::select! {
            event = engine.next_event() => match event {
                Some(event) => render(&event, &mut last_text, json),
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                control.cancel();
            }
        }
    }

    let outcome = match engine.finish().await {
        Ok(outcome) => outcome,
        Err(engine::EngineError::Capture(e)) => {
            eprintln!("{}", e.user_message());
            return Err(e).context("enrollment failed");
        }
        Err(e) => return Err(e.into()),
    };

    let enrollment = match outcome {
        LoopOutcome::Completed(enrollment) => enrollment,
        LoopOutcome::Cancelled => {
            status(json, "Enrollment cancelled.");
            return Ok(());
        }
    };

    if let (Some(path), Some(preview)) = (preview_out, &enrollment.preview) {
        std::fs::write(path, &preview.png)
            .with_context(|| format!("failed to write preview {}", path.display()))?;
        tracing::info!(path = %path.display(), width = preview.width, height = preview.height, "preview written");
    }

    let matches = find_matches(config, &enrollment)?;
    let report = EnrollReport {
        session_id: enrollment.session_id.to_string(),
        name: &enrollment.identity.name,
        completed_at: enrollment.completed_at.to_rfc3339(),
        matches: &matches,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Enrolled {} (session {})", report.name, report.session_id);
        if matches.is_empty() {
            println!("No matches");
        }
        for m in &matches {
            println!("  {:.3}  {}  {}", m.similarity, m.label, m.url);
        }
    }
    Ok(())
}

fn find_matches(config: &Config, enrollment: &CompletedEnrollment) -> Result<Vec<MatchedItem>> {
    let Some(path) = &config.gallery_path else {
        tracing::info!("no gallery configured; skipping match");
        return Ok(Vec::new());
    };
    let matcher = GalleryMatcher::from_json_file(path, config.match_threshold)
        .with_context(|| format!("failed to load gallery {}", path.display()))?;
    tracing::info!(entries = matcher.len(), "matching against gallery");
    Ok(matcher.find_matches(enrollment)?)
}

/// Read commands from stdin on a plain thread: Enter captures, `q` cancels.
fn spawn_keyboard(control: CaptureControl) {
    let spawned = std::thread::Builder::new()
        .name("posekit-keyboard".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    control.cancel();
                    break;
                }
                control.request_capture();
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "keyboard input unavailable; use Ctrl-C to cancel");
    }
}

/// Guidance goes to stderr in JSON mode so stdout stays machine-readable.
fn status(json: bool, line: &str) {
    if json {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }
}

fn render(event: &CaptureEvent, last_text: &mut Option<&'static str>, json: bool) {
    match event {
        CaptureEvent::Guidance {
            text, progress, ..
        } => {
            // Printed on change only; the loop emits one per frame.
            if *last_text != Some(*text) {
                *last_text = Some(*text);
                status(json, &format!("{}  {text}", progress_line(*progress)));
            }
        }
        CaptureEvent::Captured { pose, progress } => {
            *last_text = None;
            status(json, &format!("{}  captured {}", progress_line(*progress), pose.label()));
        }
        CaptureEvent::Rejected { guidance, .. } => {
            status(json, &format!("Not yet: {guidance}"));
        }
        CaptureEvent::Fault { message, .. } => {
            tracing::warn!(%message, "frame skipped");
        }
        CaptureEvent::Completed { .. } => status(json, posekit_core::pose::GUIDANCE_COMPLETE),
        CaptureEvent::Cancelled => {}
    }
}

fn progress_line(progress: [bool; 3]) -> String {
    PoseState::TARGETS
        .iter()
        .zip(progress)
        .map(|(pose, done)| format!("[{}] {}", if done { "x" } else { " " }, pose.label()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Synthetic detection with the given eye and nose x positions, for the
/// offline `pose` command.
fn detection_from_x(left_eye: f32, right_eye: f32, nose: f32) -> Detection {
    let landmarks = FaceLandmarks::from_keypoints([
        (left_eye, 0.0),
        (right_eye, 0.0),
        (nose, 20.0),
        (left_eye, 40.0),
        (right_eye, 40.0),
    ]);
    let min_x = left_eye.min(right_eye).min(nose);
    let max_x = left_eye.max(right_eye).max(nose);
    Detection {
        bbox: BoundingBox {
            x: min_x,
            y: 0.0,
            width: (max_x - min_x).max(1.0),
            height: 40.0,
            confidence: 1.0,
        },
        landmarks,
    }
}

fn camera_test(device: &str, frames: usize) -> Result<()> {
    println!("Running camera diagnostics on {device}...");
    let camera = Camera::open(device).with_context(|| format!("failed to open {device}"))?;
    println!("  format: {}x{} {:?}", camera.width, camera.height, camera.fourcc);

    let captured = camera.capture_frames(frames)?;
    let mut dark = 0usize;
    for frame in &captured {
        let is_dark = posekit_hw::frame::is_dark_frame(&frame.data, 0.95);
        dark += usize::from(is_dark);
        println!(
            "  frame {:>4}: brightness {:6.1}{}",
            frame.sequence,
            frame.avg_brightness(),
            if is_dark { "  (dark)" } else { "" }
        );
    }
    println!("Captured {} frames, {dark} dark", captured.len());
    Ok(())
}
