//! frame-cli - 命令行工具
//!
//! 生成合成片段、查看片段信息、无界面播放

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use frame_container::{write_synthetic_clip, SynthOptions};
use frame_player::{
    ChannelListener, ContainerBackend, FramePlayer, MediaBackend, PlayerConfig, PlayerEvent,
    RenderTarget, RenderedFrame,
};
use serde::Serialize;

const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// 只计数的渲染目标
#[derive(Default)]
struct CountingTarget {
    frames: AtomicUsize,
}

impl RenderTarget for CountingTarget {
    fn present(&self, frame: &RenderedFrame<'_>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        log::trace!("present {} us ({} bytes)", frame.pts_us, frame.data.len());
    }
}

#[derive(Serialize)]
struct ClipInfo {
    valid: bool,
    duration_ms: i64,
    width: u32,
    height: u32,
    rotation: u32,
    frames: u64,
    fps: i64,
    per_frame_us: i64,
    keyframes: usize,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("  {} synth <output.frm> [duration_ms] [fps] [gop]", program);
    eprintln!("  {} info <input.frm>   # prints JSON", program);
    eprintln!(
        "  {} play <input.frm> [--seek <ms>]... [--config <player.json>]",
        program
    );
    std::process::exit(1);
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }

    let path = PathBuf::from(&args[2]);
    match args[1].as_str() {
        "synth" => synth(&path, &args[3..]),
        "info" => info(&path),
        "play" => play(&args[0], &path, &args[3..]),
        command => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn synth(output: &Path, rest: &[String]) {
    let defaults = SynthOptions::default();
    let parse = |i: usize, default: u64| -> u64 {
        rest.get(i).and_then(|s| s.parse().ok()).unwrap_or(default)
    };
    let options = SynthOptions {
        duration_us: parse(0, defaults.duration_us / 1000) * 1000,
        fps: parse(1, defaults.fps as u64) as u32,
        gop: parse(2, defaults.gop as u64) as u32,
        ..defaults
    };

    let file = File::create(output).unwrap_or_else(|e| fail(e));
    if let Err(e) = write_synthetic_clip(file, &options) {
        fail(e);
    }

    println!("Wrote {}", output.display());
    println!("  Frames: {}", options.frame_count());
    println!("  Duration: {} ms", options.duration_us / 1000);
}

fn info(input: &Path) {
    let info = match ContainerBackend::new().probe(input) {
        Ok(info) => info,
        Err(e) => {
            println!(
                "{}",
                serde_json::json!({ "valid": false, "error": e.to_string() })
            );
            std::process::exit(2);
        }
    };

    let report = ClipInfo {
        valid: true,
        duration_ms: info.duration_us / 1000,
        width: info.width,
        height: info.height,
        rotation: info.rotation,
        frames: info.total_frames,
        fps: info.fps,
        per_frame_us: info.per_frame_duration_us,
        keyframes: info.keyframe_indexes.len(),
    };
    match serde_json::to_string(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn load_config(path: &str) -> PlayerConfig {
    let file = File::open(path).unwrap_or_else(|e| fail(format!("{}: {}", path, e)));
    serde_json::from_reader(file).unwrap_or_else(|e| fail(format!("{}: {}", path, e)))
}

/// 等待事件，途中收到的事件写入日志；返回 false 表示出错或超时
fn wait_for(events: &Receiver<PlayerEvent>, wanted: &PlayerEvent) -> bool {
    loop {
        match events.recv_timeout(EVENT_TIMEOUT) {
            Ok(event) => {
                log::info!("event: {:?}", event);
                if &event == wanted {
                    return true;
                }
                if let PlayerEvent::Error { what, extra } = event {
                    log::error!("playback error {} / {}", what.code(), extra.code());
                    return false;
                }
            }
            Err(e) => {
                log::error!("waiting for {:?}: {}", wanted, e);
                return false;
            }
        }
    }
}

fn play(program: &str, input: &Path, rest: &[String]) {
    let mut seeks = Vec::new();
    let mut config = PlayerConfig::default();

    let mut iter = rest.iter();
    while let Some(flag) = iter.next() {
        match (flag.as_str(), iter.next()) {
            ("--seek", Some(ms)) => match ms.parse::<i64>() {
                Ok(ms) => seeks.push(ms),
                Err(_) => usage(program),
            },
            ("--config", Some(path)) => config = load_config(path),
            _ => usage(program),
        }
    }

    let (listener, events) = ChannelListener::unbounded();
    let target = Arc::new(CountingTarget::default());
    let player = FramePlayer::with_config(
        Arc::new(ContainerBackend::new()),
        config,
        Some(Arc::new(listener)),
    );
    player.set_render_target(target.clone());

    let prepared = player
        .set_data_source(input)
        .and_then(|_| player.prepare());
    if let Err(e) = prepared {
        fail(e);
    }
    log::info!(
        "{}x{} rotation {}, {} ms",
        player.video_width(),
        player.video_height(),
        player.video_rotation(),
        player.duration_ms()
    );

    let mut ok = true;
    for ms in seeks {
        if let Err(e) = player.seek_to(ms) {
            fail(e);
        }
        ok = wait_for(&events, &PlayerEvent::SeekComplete);
        if !ok {
            break;
        }
        log::info!("seek to {} ms landed at {} ms", ms, player.current_position_ms());
    }

    if ok {
        if let Err(e) = player.start() {
            fail(e);
        }
        ok = wait_for(&events, &PlayerEvent::Completion);
    }

    let position = player.current_position_ms();
    if let Err(e) = player.release() {
        fail(e);
    }

    println!("Rendered {} frames", target.frames.load(Ordering::Relaxed));
    println!("Final position: {} ms", position);
    if !ok {
        std::process::exit(3);
    }
}
