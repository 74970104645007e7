//! Dance-practice audio player CLI.
//!
//! Minimal driver for the playback core: takes a list of audio files,
//! builds a playlist, and relays typed commands to a `Player` while
//! printing its event stream. Stands in for the UI this crate doesn't ship.

use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wkmp_dap::audio::device::list_output_devices;
use wkmp_dap::config::Config;
use wkmp_dap::events::EventBus;
use wkmp_dap::playback::decoder::SongDecoder;
use wkmp_dap::playback::playlist::{FilePlaylistItem, Playlist, PlaylistItem, VecPlaylist};
use wkmp_dap::playback::player::Player;

#[derive(Parser, Debug)]
#[command(name = "wkmp-dap", about = "Dance-practice audio player core")]
struct Args {
    /// Audio files to queue, in order.
    files: Vec<PathBuf>,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output device name override.
    #[arg(long)]
    device: Option<String>,

    /// Initial tempo coefficient.
    #[arg(long)]
    tempo: Option<f64>,

    /// Per-item skip-start offset in seconds, applied to every file.
    #[arg(long, default_value_t = 0.0)]
    skip_start: f64,

    /// List available output devices and exit.
    #[arg(long, default_value_t = false)]
    list_devices: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in list_output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref(), args.device.clone(), args.tempo)?;
    if let Some(tempo) = args.tempo {
        config.default_tempo = tempo;
    }

    let ring_capacity = config.ring_buffer_capacity_bytes;
    let items: Vec<Arc<dyn PlaylistItem>> = args
        .files
        .iter()
        .cloned()
        .map(|path| -> Arc<dyn PlaylistItem> {
            Arc::new(FilePlaylistItem::new(
                path,
                args.skip_start,
                -1.0,
                move |path, format, skip_start| {
                    let decoder = SongDecoder::start(path.to_path_buf(), format, skip_start, ring_capacity);
                    let buffer = decoder.buffer();
                    // Leak the decoder handle for the lifetime of the
                    // process: the buffer it feeds outlives this closure
                    // call, and the Player holds the buffer via the chain.
                    std::mem::forget(decoder);
                    buffer
                },
            ))
        })
        .collect();

    if items.is_empty() {
        anyhow::bail!("no files given; pass one or more audio files to play");
    }

    let playlist: Arc<dyn Playlist> = Arc::new(VecPlaylist::new(items));
    let events = Arc::new(EventBus::new(64));
    let player = Player::new(Arc::clone(&playlist), config, Arc::clone(&events));

    let printer_events = Arc::clone(&events);
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build event-printer runtime");
        rt.block_on(async move {
            let mut rx = printer_events.subscribe();
            loop {
                match rx.recv().await {
                    Ok(event) => info!(?event, "player event"),
                    Err(_) => break,
                }
            }
        });
    });

    info!("queued {} file(s); type 'help' for commands", playlist.len());
    player.start_pause();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let cmd = line.trim();
        match cmd {
            "help" => println!(
                "commands: play, pause, resume, stop, next, prev, seek <secs>, tempo <T>, volume <0..1>, fade, quit"
            ),
            "play" => player.start_pause(),
            "pause" => player.pause(),
            "resume" => player.resume(),
            "stop" => player.stop(),
            "next" => player.next_track(),
            "prev" => player.prev_track(),
            "fade" => player.fade_out_to_stop(),
            "quit" | "q" => break,
            other if other.starts_with("seek ") => {
                if let Ok(secs) = other[5..].trim().parse::<f64>() {
                    player.seek_to(secs);
                }
            }
            other if other.starts_with("tempo ") => {
                if let Ok(t) = other[6..].trim().parse::<f64>() {
                    player.set_tempo(t);
                }
            }
            other if other.starts_with("volume ") => {
                if let Ok(v) = other[7..].trim().parse::<f32>() {
                    player.set_volume(v);
                }
            }
            "" => {}
            _ => println!("unrecognized command, type 'help'"),
        }
    }

    Ok(())
}
