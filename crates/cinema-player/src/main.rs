use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use cinema_player::player::locator::locator_from_path;
use cinema_player::{
    CpuSurface, DecoderEngine, PlaybackState, PlayerEvent, PlayerSettings, SyntheticEngine,
    VideoPlayer, VideoSurface, WgpuSurface,
};

const TICK: Duration = Duration::from_micros(16_667);
const TEST_PATTERN: &str = "synthetic://test-pattern";

struct Options {
    locator: Option<String>,
    seconds: u64,
    cpu: bool,
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        locator: None,
        seconds: 10,
        cpu: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cpu" => options.cpu = true,
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                options.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value '{value}'"))?;
            }
            _ => options.locator = Some(arg),
        }
    }
    Ok(options)
}

/// Accept URLs as-is and turn existing local paths into `file://` locators.
fn resolve_locator(raw: &str) -> Result<String> {
    let path = Path::new(raw);
    if path.exists() {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("cannot resolve {}", path.display()))?;
        return Ok(locator_from_path(&absolute)?.to_string());
    }
    Ok(raw.to_string())
}

fn create_engine(settings: &PlayerSettings, locator: &str) -> Box<dyn DecoderEngine> {
    #[cfg(feature = "vlc")]
    {
        if locator != TEST_PATTERN {
            match cinema_player::VlcEngine::new(&settings.engine_args()) {
                Ok(engine) => return Box::new(engine),
                Err(e) => {
                    log::warn!("{e}, falling back to the test pattern");
                    for path in cinema_player::engine::vlc::vlc_search_diagnostics() {
                        log::debug!("  searched {path}");
                    }
                }
            }
        }
    }
    #[cfg(not(feature = "vlc"))]
    let _ = (settings, locator);

    Box::new(SyntheticEngine::default())
}

fn run<S: VideoSurface>(mut player: VideoPlayer<S>, locator: &str, seconds: u64) -> PlaybackState {
    let events = player.events();
    player.play(locator);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0u64;
    while Instant::now() < deadline {
        player.update();

        for event in events.try_iter() {
            match event {
                PlayerEvent::FrameReady => frames += 1,
                PlayerEvent::PlaybackStateChanged(state) => log::info!("State: {state:?}"),
                PlayerEvent::QualitiesChanged => {
                    let labels: Vec<String> = player
                        .available_qualities()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    log::info!("Qualities: {}", labels.join(", "));
                }
            }
        }
        if player.state().is_terminal() {
            break;
        }
        std::thread::sleep(TICK);
    }

    log::info!(
        "Presented {frames} frames at {}x{}",
        player.video_width(),
        player.video_height()
    );
    let state = player.state();
    player.stop();
    state
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let options = parse_args()?;
    let mut settings = PlayerSettings::load();

    let locator = match options.locator.as_deref() {
        Some(raw) => resolve_locator(raw)?,
        None => settings
            .last_url
            .clone()
            .unwrap_or_else(|| TEST_PATTERN.to_string()),
    };

    let engine = create_engine(&settings, &locator);
    let volume = i32::try_from(settings.volume).unwrap_or(100);

    let gpu = if options.cpu {
        None
    } else {
        WgpuSurface::headless()
            .inspect_err(|e| log::warn!("{e}, uploading to CPU memory instead"))
            .ok()
    };

    let state = if let Some(surface) = gpu {
        let mut player = VideoPlayer::new(engine, surface);
        player.set_volume(volume);
        run(player, &locator, options.seconds)
    } else {
        let mut player = VideoPlayer::new(engine, CpuSurface::new());
        player.set_volume(volume);
        run(player, &locator, options.seconds)
    };

    if state == PlaybackState::Error {
        anyhow::bail!("playback of {locator} failed");
    }

    if locator != TEST_PATTERN {
        settings.last_url = Some(locator);
        settings.save();
    }
    Ok(())
}
