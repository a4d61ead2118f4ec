//! live-audio - command line demo
//!
//! Plays an audio file (if given) while monitoring the default microphone,
//! printing input and output levels once per second.
//!
//! Usage: `live-audio [FILE] [SECONDS]`

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use live_audio::{
    compute_volume, compute_volume_of_player, AudioData, AudioSettings, CaptureBuffer,
    ErrorReporter, LogReporter, PlaybackEngine,
};

const TICK: Duration = Duration::from_millis(16);
const DEFAULT_RUN_TIME: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting live-audio");

    let mut args = std::env::args().skip(1);
    let file = args.next();
    let run_time = match args.next().map(|s| s.parse::<f64>()) {
        Some(Ok(seconds)) if seconds > 0.0 => Duration::from_secs_f64(seconds),
        Some(_) => {
            eprintln!("SECONDS must be a positive number");
            return ExitCode::FAILURE;
        }
        None => DEFAULT_RUN_TIME,
    };

    let settings = AudioSettings::load();
    let reporter: Arc<dyn ErrorReporter> = Arc::new(LogReporter);

    let mut capture = CaptureBuffer::with_default_host(Arc::clone(&reporter));
    let mut player = PlaybackEngine::with_default_host(reporter);
    capture.apply_settings(&settings);
    player.apply_settings(&settings);

    if !capture.current_device_is_valid() {
        log::warn!("No usable input device, input level will stay at 0");
    }

    if let Some(path) = &file {
        match AudioData::load(path) {
            Ok(data) => {
                player.set_audio_data(data);
                player.play();
            }
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        }
        if !player.has_device() {
            log::warn!("No usable output device, nothing will be heard");
        }
    }

    let window = settings.retained_samples;
    let mut input = Vec::with_capacity(window);
    let start = Instant::now();
    let mut last_report = start;

    while start.elapsed() < run_time {
        capture.update();
        player.update_device_if_necessary();

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();

            input.clear();
            capture.for_each_sample(window, |sample| input.push(sample));
            println!(
                "t={:6.2}s  in={:.3}  out={:.3}",
                player.get_time(),
                compute_volume(&input),
                compute_volume_of_player(&player, 0.2)
            );
        }

        thread::sleep(TICK);
    }

    capture.shut_down();
    player.shut_down();

    if let Err(e) = AudioSettings::from_components(&capture, &player).save() {
        log::warn!("{}", e);
    }

    ExitCode::SUCCESS
}
