//! Player: state machine binding a playlist to the effect chain and
//! driving the audio device.
//!
//! The UI thread only ever sends commands through an mpsc queue; all state
//! transitions execute on the output thread, which also owns the last
//! references to the decoder and effect chain so they tear down there.

use crate::audio::device::AudioOutput;
use crate::audio::format::AudioFormat;
use crate::config::Config;
use crate::events::{EventBus, PlayerEvent};
use crate::playback::effects::fadeout::FadeOutStage;
use crate::playback::effects::tempo::TempoStage;
use crate::playback::effects::{Adapter, AudioSource};
use crate::playback::playlist::{Playlist, PlaylistItem};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
    FadingOutToStop,
    FadingOutToTrack,
}

enum PlayerCommand {
    StartPause,
    Pause,
    Resume,
    Stop,
    NextTrack,
    PrevTrack,
    JumpTo(usize),
    SeekTo(f64),
    SetVolume(f32),
    SetTempo(f64),
    FadeOutToStop,
    /// The item currently loaded was removed from the playlist out from
    /// under the Player; react the same way a `next()` would.
    CurrentItemRemoved,
    Quit,
}

/// State shared between the `Player` handle (UI thread) and the output
/// thread. Atomics so observational queries never block on the realtime
/// path.
struct Shared {
    state: Mutex<PlayerState>,
    tempo_bits: AtomicU64,
    track_loaded: AtomicBool,
    playing: AtomicBool,
    current_chain: Mutex<Option<Arc<dyn AudioSource>>>,
    current_item: Mutex<Option<Arc<dyn PlaylistItem>>>,
    track_started_at: Mutex<Option<Instant>>,
    volume_bits: AtomicU32,
}

impl Shared {
    fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo_bits.load(Ordering::Relaxed))
    }
    fn set_tempo_value(&self, t: f64) {
        self.tempo_bits.store(t.to_bits(), Ordering::Relaxed);
    }
}

pub struct Player {
    shared: Arc<Shared>,
    command_tx: Sender<PlayerCommand>,
    output_thread: Option<JoinHandle<()>>,
}

impl Player {
    /// Opens the audio device (falling back through the candidate format
    /// cascade) and starts the output thread. If the device cannot be
    /// opened at all, returns a Player that stays `Stopped` forever.
    pub fn new(
        playlist: Arc<dyn Playlist>,
        config: Config,
        events: Arc<EventBus>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PlayerState::Stopped),
            tempo_bits: AtomicU64::new(config.default_tempo.to_bits()),
            track_loaded: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            current_chain: Mutex::new(None),
            current_item: Mutex::new(None),
            track_started_at: Mutex::new(None),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
        });

        let (command_tx, command_rx) = mpsc::channel();

        // If the item currently loaded gets deleted out from under us,
        // react the same way a next() would: fade into the track after it.
        let removal_shared = Arc::clone(&shared);
        let removal_tx = command_tx.clone();
        playlist.subscribe_removal(Box::new(move |removed| {
            let is_current = removal_shared
                .current_item
                .lock()
                .unwrap()
                .as_ref()
                .map(|c| Arc::ptr_eq(c, &removed))
                .unwrap_or(false);
            if is_current {
                let _ = removal_tx.send(PlayerCommand::CurrentItemRemoved);
            }
        }));

        let output = AudioOutput::open(config.output_device_name.as_deref());

        let thread_shared = Arc::clone(&shared);
        let thread_playlist = Arc::clone(&playlist);
        let thread_events = Arc::clone(&events);
        let output_thread = std::thread::Builder::new()
            .name("player-output".into())
            .spawn(move || {
                let mut output = match output {
                    Ok(o) => o,
                    Err(e) => {
                        warn!(error = %e, "no usable output device, player stays Stopped");
                        // Drain commands until Quit so Drop doesn't hang.
                        loop {
                            match command_rx.recv() {
                                Ok(PlayerCommand::Quit) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                        return;
                    }
                };
                run_output_thread(
                    thread_shared,
                    thread_playlist,
                    config,
                    command_rx,
                    &mut output,
                    thread_events,
                );
            })
            .expect("failed to spawn output thread");

        Player {
            shared,
            command_tx,
            output_thread: Some(output_thread),
        }
    }

    fn send(&self, cmd: PlayerCommand) {
        let _ = self.command_tx.send(cmd);
    }

    pub fn start_pause(&self) {
        self.send(PlayerCommand::StartPause)
    }
    pub fn pause(&self) {
        self.send(PlayerCommand::Pause)
    }
    pub fn resume(&self) {
        self.send(PlayerCommand::Resume)
    }
    pub fn stop(&self) {
        self.send(PlayerCommand::Stop)
    }
    pub fn next_track(&self) {
        self.send(PlayerCommand::NextTrack)
    }
    pub fn prev_track(&self) {
        self.send(PlayerCommand::PrevTrack)
    }
    pub fn jump_to(&self, index: usize) {
        self.send(PlayerCommand::JumpTo(index))
    }
    pub fn seek_to(&self, seconds: f64) {
        self.send(PlayerCommand::SeekTo(seconds))
    }
    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.send(PlayerCommand::SetVolume(volume))
    }
    pub fn set_tempo(&self, tempo: f64) {
        self.send(PlayerCommand::SetTempo(tempo))
    }
    pub fn fade_out_to_stop(&self) {
        self.send(PlayerCommand::FadeOutToStop)
    }

    pub fn current_position_seconds(&self) -> f64 {
        self.shared
            .current_chain
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.current_position_seconds())
            .unwrap_or(0.0)
    }

    pub fn remaining_time_seconds(&self) -> Option<f64> {
        self.shared
            .current_chain
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|c| c.remaining_time_seconds())
    }

    pub fn total_time_seconds(&self) -> Option<f64> {
        self.current_item()
            .map(|item| item.total_playback_duration())
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn is_track_loaded(&self) -> bool {
        self.shared.track_loaded.load(Ordering::Acquire)
    }

    pub fn current_item(&self) -> Option<Arc<dyn PlaylistItem>> {
        self.shared.current_item.lock().unwrap().clone()
    }

    pub fn state(&self) -> PlayerState {
        *self.shared.state.lock().unwrap()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.send(PlayerCommand::Quit);
        if let Some(t) = self.output_thread.take() {
            let _ = t.join();
        }
    }
}

fn run_output_thread(
    shared: Arc<Shared>,
    playlist: Arc<dyn Playlist>,
    config: Config,
    command_rx: std::sync::mpsc::Receiver<PlayerCommand>,
    output: &mut AudioOutput,
    events: Arc<EventBus>,
) {
    let device_format = output.format();
    let notify_interval = Duration::from_millis(config.position_event_interval_ms.max(1));

    loop {
        match command_rx.recv_timeout(notify_interval) {
            Ok(PlayerCommand::Quit) => break,
            Ok(cmd) => handle_command(
                &shared,
                &playlist,
                &config,
                cmd,
                output,
                device_format,
                &events,
            ),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(cmd) = command_rx.try_recv() {
            if matches!(cmd, PlayerCommand::Quit) {
                return;
            }
            handle_command(
                &shared,
                &playlist,
                &config,
                cmd,
                output,
                device_format,
                &events,
            );
        }

        check_eof_and_duration_limit(&shared, &playlist, &config, output, device_format, &events);
    }
}

fn handle_command(
    shared: &Arc<Shared>,
    playlist: &Arc<dyn Playlist>,
    config: &Config,
    cmd: PlayerCommand,
    output: &mut AudioOutput,
    device_format: AudioFormat,
    events: &Arc<EventBus>,
) {
    let state = *shared.state.lock().unwrap();
    match cmd {
        PlayerCommand::StartPause => {
            if state == PlayerState::Stopped {
                begin_track(shared, playlist, config, output, device_format, events);
            }
        }
        PlayerCommand::Pause => {
            if state == PlayerState::Playing {
                output.stop();
                shared.playing.store(false, Ordering::Release);
                *shared.state.lock().unwrap() = PlayerState::Paused;
            }
        }
        PlayerCommand::Resume => {
            if state == PlayerState::Paused {
                resume_device(shared, output);
                *shared.state.lock().unwrap() = PlayerState::Playing;
            }
        }
        PlayerCommand::Stop => match state {
            PlayerState::Playing => {
                begin_fade(shared, config, PlayerState::FadingOutToStop);
            }
            PlayerState::Paused => {
                output.stop();
                teardown_track(shared);
                *shared.state.lock().unwrap() = PlayerState::Stopped;
            }
            _ => {}
        },
        PlayerCommand::NextTrack => {
            playlist.next();
            handle_track_advance_request(shared, config, state);
        }
        PlayerCommand::PrevTrack => {
            playlist.prev();
            handle_track_advance_request(shared, config, state);
        }
        PlayerCommand::JumpTo(index) => {
            playlist.set_current(index);
            handle_track_advance_request(shared, config, state);
        }
        PlayerCommand::SeekTo(seconds) => {
            if state == PlayerState::Playing || state == PlayerState::Paused {
                if let Some(chain) = shared.current_chain.lock().unwrap().as_ref() {
                    chain.seek_to((seconds * device_format.sample_rate as f64) as u64);
                }
            }
        }
        PlayerCommand::SetVolume(v) => {
            output.set_volume(v);
        }
        PlayerCommand::SetTempo(t) => {
            if t > 0.0 {
                shared.set_tempo_value(t);
                if let Some(chain) = shared.current_chain.lock().unwrap().as_ref() {
                    chain.set_tempo(t);
                }
                if let Some(item) = shared.current_item.lock().unwrap().as_ref() {
                    item.set_tempo_coeff(t);
                    events.emit_lossy(PlayerEvent::TempoCoeffChanged {
                        item_name: item.display_name(),
                        tempo: t,
                    });
                }
            }
        }
        PlayerCommand::FadeOutToStop => {
            handle_fade_out_to_stop_request(shared, config, state)
        }
        PlayerCommand::CurrentItemRemoved => {
            handle_track_advance_request(shared, config, state);
        }
        PlayerCommand::Quit => {}
    }
}

/// `next()`/`prev()`/`jump_to()` while Playing never switch instantly: they
/// advance the playlist index then fade into `FadingOutToTrack`. In every
/// other state they only change which index will play next.
fn handle_track_advance_request(shared: &Arc<Shared>, config: &Config, state: PlayerState) {
    match state {
        PlayerState::Playing => begin_fade(shared, config, PlayerState::FadingOutToTrack),
        PlayerState::FadingOutToStop => {
            *shared.state.lock().unwrap() = PlayerState::FadingOutToTrack;
        }
        PlayerState::FadingOutToTrack => {
            // no-op per the transition table
        }
        _ => {}
    }
}

/// `fade_out_to_stop()` while `FadingOutToTrack` redirects the in-flight
/// fade to stop instead of letting the track switch happen; the envelope
/// already running must not restart.
fn handle_fade_out_to_stop_request(shared: &Arc<Shared>, config: &Config, state: PlayerState) {
    match state {
        PlayerState::Playing => begin_fade(shared, config, PlayerState::FadingOutToStop),
        PlayerState::FadingOutToTrack => {
            *shared.state.lock().unwrap() = PlayerState::FadingOutToStop;
        }
        _ => {}
    }
}

fn begin_fade(shared: &Arc<Shared>, config: &Config, target: PlayerState) {
    if let Some(chain) = shared.current_chain.lock().unwrap().as_ref() {
        chain.fade_out(config.default_fade_out_ms);
    }
    *shared.state.lock().unwrap() = target;
}

fn resume_device(shared: &Arc<Shared>, output: &mut AudioOutput) {
    let chain = shared.current_chain.lock().unwrap().clone();
    if let Some(chain) = chain {
        start_pull(output, chain);
        shared.playing.store(true, Ordering::Release);
    }
}

fn teardown_track(shared: &Arc<Shared>) {
    // Dropping these is what finalizes the decoder worker (join) and the
    // chain; this happens on the output thread "Source EOF".
    *shared.current_chain.lock().unwrap() = None;
    *shared.current_item.lock().unwrap() = None;
    *shared.track_started_at.lock().unwrap() = None;
    shared.track_loaded.store(false, Ordering::Release);
    shared.playing.store(false, Ordering::Release);
}

/// Loads the playlist's current item and starts it playing. If the item
/// can't be opened/decoded at all (`PlaybackBuffer::has_error()`), emits
/// `InvalidTrackSkipped` and keeps advancing until one plays or the
/// playlist is exhausted.
fn begin_track(
    shared: &Arc<Shared>,
    playlist: &Arc<dyn Playlist>,
    config: &Config,
    output: &mut AudioOutput,
    device_format: AudioFormat,
    events: &Arc<EventBus>,
) {
    let (item, buffer) = loop {
        let item = match playlist.current() {
            Some(i) => i,
            None => return,
        };

        events.emit_lossy(PlayerEvent::StartingPlayback {
            item_name: item.display_name(),
        });

        let buffer = item.start_decoding(device_format);
        buffer.wait_for_data();

        if buffer.has_error() {
            events.emit_lossy(PlayerEvent::InvalidTrackSkipped {
                item_name: item.display_name(),
            });
            if playlist.next() {
                continue;
            }
            *shared.state.lock().unwrap() = PlayerState::Stopped;
            return;
        }

        break (item, buffer);
    };

    let buffer_source: Arc<dyn AudioSource> = buffer;
    let tempo_stage: Arc<dyn AudioSource> = Arc::new(TempoStage::new(buffer_source));
    let chain: Arc<dyn AudioSource> = Arc::new(FadeOutStage::new(tempo_stage));
    chain.set_tempo(shared.tempo());
    item.set_tempo_coeff(shared.tempo());

    *shared.current_chain.lock().unwrap() = Some(Arc::clone(&chain));
    *shared.current_item.lock().unwrap() = Some(Arc::clone(&item));
    *shared.track_started_at.lock().unwrap() = Some(Instant::now());
    shared.track_loaded.store(true, Ordering::Release);

    start_pull(output, chain);
    output.set_volume(f32::from_bits(shared.volume_bits.load(Ordering::Relaxed)));
    shared.playing.store(true, Ordering::Release);
    *shared.state.lock().unwrap() = PlayerState::Playing;

    events.emit_lossy(PlayerEvent::StartedPlayback {
        item_name: item.display_name(),
    });
    let _ = config;
}

fn start_pull(output: &mut AudioOutput, chain: Arc<dyn AudioSource>) {
    let adapter = Adapter::new(chain);
    let bytes_per_frame = 2usize; // i16 per sample, interleaved by device channel count
    let mut scratch = vec![0u8; 8192];
    if output
        .start(move |out: &mut [i16]| {
            let need_bytes = out.len() * bytes_per_frame;
            if scratch.len() < need_bytes {
                scratch.resize(need_bytes, 0);
            }
            let got = adapter.read(&mut scratch[..need_bytes]);
            for (i, dst) in out.iter_mut().enumerate() {
                let off = i * bytes_per_frame;
                *dst = if off + 1 < got {
                    i16::from_le_bytes([scratch[off], scratch[off + 1]])
                } else {
                    0
                };
            }
        })
        .is_err()
    {
        warn!("failed to start output stream for track");
    }
}

/// Output-thread-side EOF/duration-limit poll, run once per notify tick.
/// "Source EOF" is observed here as the current chain having
/// aborted with nothing left to read.
fn check_eof_and_duration_limit(
    shared: &Arc<Shared>,
    playlist: &Arc<dyn Playlist>,
    config: &Config,
    output: &mut AudioOutput,
    device_format: AudioFormat,
    events: &Arc<EventBus>,
) {
    let state = *shared.state.lock().unwrap();
    if state == PlayerState::Stopped {
        return;
    }

    let drained = {
        let chain = shared.current_chain.lock().unwrap();
        match chain.as_ref() {
            Some(c) => c.should_abort(),
            None => false,
        }
    };

    if drained && state != PlayerState::Paused {
        events.emit_lossy(PlayerEvent::FinishedPlayback);
        output.stop();
        match state {
            PlayerState::Playing => {
                teardown_track(shared);
                if playlist.next() {
                    begin_track(shared, playlist, config, output, device_format, events);
                } else {
                    *shared.state.lock().unwrap() = PlayerState::Stopped;
                }
            }
            PlayerState::FadingOutToStop => {
                teardown_track(shared);
                *shared.state.lock().unwrap() = PlayerState::Stopped;
            }
            PlayerState::FadingOutToTrack => {
                teardown_track(shared);
                begin_track(shared, playlist, config, output, device_format, events);
            }
            _ => {}
        }
        return;
    }

    if state != PlayerState::Playing {
        return;
    }

    // Duration-limit enforcement: the only use of wall-clock time in the
    // core.
    let item = shared.current_item.lock().unwrap().clone();
    if let Some(item) = item {
        let limit = item.duration_limit();
        if limit > 0.0 {
            let started = *shared.track_started_at.lock().unwrap();
            if let Some(started) = started {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed >= limit {
                    if playlist.next() {
                        teardown_track(shared);
                        output.stop();
                        begin_track(shared, playlist, config, output, device_format, events);
                    } else {
                        output.stop();
                        shared.playing.store(false, Ordering::Release);
                        *shared.state.lock().unwrap() = PlayerState::Paused;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::buffer::PlaybackBuffer;
    use crate::playback::playlist::VecPlaylist;
    use std::sync::Mutex as StdMutex;

    struct TestItem {
        tempo: StdMutex<f64>,
        limit: StdMutex<f64>,
    }

    impl PlaylistItem for TestItem {
        fn display_name(&self) -> String {
            "test".into()
        }
        fn display_author(&self) -> String {
            String::new()
        }
        fn display_title(&self) -> String {
            "test".into()
        }
        fn display_length(&self) -> f64 {
            1.0
        }
        fn display_genre(&self) -> String {
            String::new()
        }
        fn display_tempo(&self) -> f64 {
            -1.0
        }
        fn duration_limit(&self) -> f64 {
            *self.limit.lock().unwrap()
        }
        fn set_duration_limit(&self, seconds: f64) {
            *self.limit.lock().unwrap() = seconds;
        }
        fn tempo_coeff(&self) -> f64 {
            *self.tempo.lock().unwrap()
        }
        fn set_tempo_coeff(&self, tempo: f64) {
            *self.tempo.lock().unwrap() = tempo;
        }
        fn start_decoding(&self, format: AudioFormat) -> Arc<PlaybackBuffer> {
            Arc::new(PlaybackBuffer::new(format, 4096))
        }
    }

    #[test]
    fn playlist_wiring_smoke() {
        let items: Vec<Arc<dyn PlaylistItem>> = vec![Arc::new(TestItem {
            tempo: StdMutex::new(1.0),
            limit: StdMutex::new(-1.0),
        })];
        let playlist = VecPlaylist::new(items);
        assert!(playlist.current().is_some());
    }

    fn test_shared(state: PlayerState) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(state),
            tempo_bits: AtomicU64::new(1.0f64.to_bits()),
            track_loaded: AtomicBool::new(true),
            playing: AtomicBool::new(true),
            current_chain: Mutex::new(None),
            current_item: Mutex::new(None),
            track_started_at: Mutex::new(None),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
        })
    }

    #[test]
    fn next_while_playing_begins_fade_to_track() {
        let shared = test_shared(PlayerState::Playing);
        let config = Config::default();
        handle_track_advance_request(&shared, &config, PlayerState::Playing);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::FadingOutToTrack);
    }

    #[test]
    fn next_during_fading_out_to_stop_redirects_without_restarting_fade() {
        // next() during FadingOutToStop redirects to FadingOutToTrack
        // without restarting the in-flight fade.
        let shared = test_shared(PlayerState::FadingOutToStop);
        let config = Config::default();
        handle_track_advance_request(&shared, &config, PlayerState::FadingOutToStop);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::FadingOutToTrack);
    }

    #[test]
    fn next_during_fading_out_to_track_is_a_no_op() {
        let shared = test_shared(PlayerState::FadingOutToTrack);
        let config = Config::default();
        handle_track_advance_request(&shared, &config, PlayerState::FadingOutToTrack);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::FadingOutToTrack);
    }

    #[test]
    fn next_while_stopped_is_a_no_op_for_state() {
        let shared = test_shared(PlayerState::Stopped);
        let config = Config::default();
        handle_track_advance_request(&shared, &config, PlayerState::Stopped);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::Stopped);
    }

    #[test]
    fn fade_out_to_stop_during_fading_out_to_track_redirects_without_restarting_fade() {
        let shared = test_shared(PlayerState::FadingOutToTrack);
        let config = Config::default();
        handle_fade_out_to_stop_request(&shared, &config, PlayerState::FadingOutToTrack);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::FadingOutToStop);
    }

    #[test]
    fn fade_out_to_stop_while_playing_begins_fade() {
        let shared = test_shared(PlayerState::Playing);
        let config = Config::default();
        handle_fade_out_to_stop_request(&shared, &config, PlayerState::Playing);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::FadingOutToStop);
    }

    #[test]
    fn fade_out_to_stop_while_stopped_is_a_no_op() {
        let shared = test_shared(PlayerState::Stopped);
        let config = Config::default();
        handle_fade_out_to_stop_request(&shared, &config, PlayerState::Stopped);
        assert_eq!(*shared.state.lock().unwrap(), PlayerState::Stopped);
    }
}
