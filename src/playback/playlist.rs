//! The `PlaylistItem`/`Playlist` contracts the Player consumes.
//!
//! These are external collaborators (the metadata store and
//! playlist container are out of scope); what's here is the minimal trait
//! surface the core needs, plus one concrete in-memory playlist and one
//! concrete file-backed item so the CLI and tests have something to drive
//! the pipeline with.

use crate::audio::format::AudioFormat;
use crate::playback::buffer::PlaybackBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Contract consumed by the Player for a single queued item. Most display
/// and bookkeeping methods have sensible no-op defaults so a minimal
/// implementation only needs to supply the handful that matter.
pub trait PlaylistItem: Send + Sync {
    fn display_name(&self) -> String;
    fn display_author(&self) -> String;
    fn display_title(&self) -> String;
    /// Seconds, at the current tempo adjustment.
    fn display_length(&self) -> f64;
    fn display_genre(&self) -> String;
    /// <0 if not available.
    fn display_tempo(&self) -> f64;

    /// <0 means unlimited.
    fn duration_limit(&self) -> f64;
    fn set_duration_limit(&self, seconds: f64);

    /// Seconds before decoding starts at which to begin decoding.
    fn skip_start(&self) -> f64 {
        0.0
    }

    fn tempo_coeff(&self) -> f64;
    fn set_tempo_coeff(&self, tempo: f64);

    fn playback_started(&self) -> Option<std::time::SystemTime> {
        None
    }
    fn set_playback_started(&self, _started: Option<std::time::SystemTime>) {}
    fn playback_ended(&self) -> Option<std::time::SystemTime> {
        None
    }
    fn set_playback_ended(&self, _ended: Option<std::time::SystemTime>) {}

    /// Updates the item's recorded end time from the current remaining
    /// playback duration, clamped by the duration limit. Used by playlist
    /// UIs for wall-clock time displays; returns true iff the end time
    /// changed from its previous value.
    fn update_end_time_from_remaining_time(&self, remaining_seconds: f64) -> bool {
        let mut end = std::time::SystemTime::now()
            + std::time::Duration::from_secs_f64(remaining_seconds.max(0.0));
        let lim = self.duration_limit();
        if lim > 0.0 {
            if let Some(started) = self.playback_started() {
                let limited_end = started + std::time::Duration::from_secs_f64(lim);
                if end > limited_end {
                    end = limited_end;
                }
            }
        }
        if self.playback_ended() != Some(end) {
            self.set_playback_ended(Some(end));
            true
        } else {
            false
        }
    }

    /// min(display_length, duration_limit) when a limit is set.
    fn total_playback_duration(&self) -> f64 {
        let dur = self.display_length();
        let lim = self.duration_limit();
        if lim > 0.0 {
            dur.min(lim)
        } else {
            dur
        }
    }

    /// Starts decoding into a fresh `PlaybackBuffer` at the given device
    /// format. Returns `Arc` since the chain and the output thread share
    /// ownership of the bottom of the stack.
    fn start_decoding(&self, format: AudioFormat) -> Arc<PlaybackBuffer>;
}

/// The playlist container contract consumed by the Player.
pub trait Playlist: Send + Sync {
    fn current(&self) -> Option<Arc<dyn PlaylistItem>>;
    /// Advances to the next item; returns false if already at the end.
    fn next(&self) -> bool;
    /// Moves to the previous item; returns false if already at the start.
    fn prev(&self) -> bool;
    fn set_current(&self, index: usize) -> bool;
    fn remove(&self, index: usize);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn current_index(&self) -> Option<usize>;

    /// Registers a callback invoked with the removed item each time
    /// `remove()` takes one out, after the index bookkeeping has settled.
    /// The Player uses this to notice when the item it's currently playing
    /// was deleted out from under it and fade to whatever comes next.
    fn subscribe_removal(&self, callback: Box<dyn Fn(Arc<dyn PlaylistItem>) + Send + Sync>);
}

/// A plain `Vec`-backed playlist with a current index. Stands in for the
/// excluded template-driven playlist container.
pub struct VecPlaylist {
    items: Mutex<Vec<Arc<dyn PlaylistItem>>>,
    current: Mutex<Option<usize>>,
    removal_subs: Mutex<Vec<Box<dyn Fn(Arc<dyn PlaylistItem>) + Send + Sync>>>,
}

impl VecPlaylist {
    pub fn new(items: Vec<Arc<dyn PlaylistItem>>) -> Self {
        let current = if items.is_empty() { None } else { Some(0) };
        VecPlaylist {
            items: Mutex::new(items),
            current: Mutex::new(current),
            removal_subs: Mutex::new(Vec::new()),
        }
    }
}

impl Playlist for VecPlaylist {
    fn current(&self) -> Option<Arc<dyn PlaylistItem>> {
        let idx = (*self.current.lock().unwrap())?;
        self.items.lock().unwrap().get(idx).cloned()
    }

    fn next(&self) -> bool {
        let len = self.items.lock().unwrap().len();
        let mut cur = self.current.lock().unwrap();
        match *cur {
            Some(i) if i + 1 < len => {
                *cur = Some(i + 1);
                true
            }
            _ => false,
        }
    }

    fn prev(&self) -> bool {
        let mut cur = self.current.lock().unwrap();
        match *cur {
            Some(i) if i > 0 => {
                *cur = Some(i - 1);
                true
            }
            _ => false,
        }
    }

    fn set_current(&self, index: usize) -> bool {
        let len = self.items.lock().unwrap().len();
        if index < len {
            *self.current.lock().unwrap() = Some(index);
            true
        } else {
            false
        }
    }

    fn remove(&self, index: usize) {
        let removed = {
            let mut items = self.items.lock().unwrap();
            if index >= items.len() {
                return;
            }
            let removed = items.remove(index);
            let mut cur = self.current.lock().unwrap();
            if let Some(i) = *cur {
                if items.is_empty() {
                    *cur = None;
                } else if i >= items.len() {
                    *cur = Some(items.len() - 1);
                }
            }
            removed
        };
        for callback in self.removal_subs.lock().unwrap().iter() {
            callback(Arc::clone(&removed));
        }
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn current_index(&self) -> Option<usize> {
        *self.current.lock().unwrap()
    }

    fn subscribe_removal(&self, callback: Box<dyn Fn(Arc<dyn PlaylistItem>) + Send + Sync>) {
        self.removal_subs.lock().unwrap().push(callback);
    }
}

/// Minimal file-backed playlist item: a path, an optional skip-start, an
/// optional duration limit, and a live tempo coefficient cell. Reads no
/// database; symphonia's own probe supplies everything else.
pub struct FilePlaylistItem {
    path: std::path::PathBuf,
    skip_start_seconds: f64,
    duration_limit: Mutex<f64>,
    tempo_coeff: AtomicTempo,
    decode_fn: Box<dyn Fn(&std::path::Path, AudioFormat, f64) -> Arc<PlaybackBuffer> + Send + Sync>,
}

/// f64 doesn't have a native atomic; store the bit pattern in an AtomicU64.
struct AtomicTempo(AtomicU64);

impl AtomicTempo {
    fn new(v: f64) -> Self {
        AtomicTempo(AtomicU64::new(v.to_bits()))
    }
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed)
    }
}

impl FilePlaylistItem {
    pub fn new(
        path: impl Into<std::path::PathBuf>,
        skip_start_seconds: f64,
        duration_limit: f64,
        decode_fn: impl Fn(&std::path::Path, AudioFormat, f64) -> Arc<PlaybackBuffer>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        FilePlaylistItem {
            path: path.into(),
            skip_start_seconds,
            duration_limit: Mutex::new(duration_limit),
            tempo_coeff: AtomicTempo::new(1.0),
            decode_fn: Box::new(decode_fn),
        }
    }
}

impl PlaylistItem for FilePlaylistItem {
    fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn display_author(&self) -> String {
        String::new()
    }

    fn display_title(&self) -> String {
        self.display_name()
    }

    fn display_length(&self) -> f64 {
        0.0
    }

    fn display_genre(&self) -> String {
        String::new()
    }

    fn display_tempo(&self) -> f64 {
        -1.0
    }

    fn duration_limit(&self) -> f64 {
        *self.duration_limit.lock().unwrap()
    }

    fn set_duration_limit(&self, seconds: f64) {
        *self.duration_limit.lock().unwrap() = seconds;
    }

    fn skip_start(&self) -> f64 {
        self.skip_start_seconds
    }

    fn tempo_coeff(&self) -> f64 {
        self.tempo_coeff.load()
    }

    fn set_tempo_coeff(&self, tempo: f64) {
        self.tempo_coeff.store(tempo);
    }

    fn start_decoding(&self, format: AudioFormat) -> Arc<PlaybackBuffer> {
        (self.decode_fn)(&self.path, format, self.skip_start_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyItem(Mutex<f64>);

    impl PlaylistItem for DummyItem {
        fn display_name(&self) -> String {
            "dummy".into()
        }
        fn display_author(&self) -> String {
            String::new()
        }
        fn display_title(&self) -> String {
            "dummy".into()
        }
        fn display_length(&self) -> f64 {
            10.0
        }
        fn display_genre(&self) -> String {
            String::new()
        }
        fn display_tempo(&self) -> f64 {
            -1.0
        }
        fn duration_limit(&self) -> f64 {
            *self.0.lock().unwrap()
        }
        fn set_duration_limit(&self, seconds: f64) {
            *self.0.lock().unwrap() = seconds;
        }
        fn tempo_coeff(&self) -> f64 {
            1.0
        }
        fn set_tempo_coeff(&self, _tempo: f64) {}
        fn start_decoding(&self, format: AudioFormat) -> Arc<PlaybackBuffer> {
            Arc::new(PlaybackBuffer::new(format, 4096))
        }
    }

    #[test]
    fn total_playback_duration_clamped_by_limit() {
        let item = DummyItem(Mutex::new(4.0));
        assert_eq!(item.total_playback_duration(), 4.0);
    }

    #[test]
    fn total_playback_duration_unlimited_when_negative() {
        let item = DummyItem(Mutex::new(-1.0));
        assert_eq!(item.total_playback_duration(), 10.0);
    }

    #[test]
    fn vec_playlist_next_prev_bounds() {
        let items: Vec<Arc<dyn PlaylistItem>> = vec![
            Arc::new(DummyItem(Mutex::new(-1.0))),
            Arc::new(DummyItem(Mutex::new(-1.0))),
        ];
        let pl = VecPlaylist::new(items);
        assert_eq!(pl.current_index(), Some(0));
        assert!(pl.next());
        assert_eq!(pl.current_index(), Some(1));
        assert!(!pl.next());
        assert!(pl.prev());
        assert_eq!(pl.current_index(), Some(0));
        assert!(!pl.prev());
    }

    #[test]
    fn vec_playlist_remove_current_clamps_index() {
        let items: Vec<Arc<dyn PlaylistItem>> = vec![
            Arc::new(DummyItem(Mutex::new(-1.0))),
            Arc::new(DummyItem(Mutex::new(-1.0))),
        ];
        let pl = VecPlaylist::new(items);
        pl.set_current(1);
        pl.remove(1);
        assert_eq!(pl.current_index(), Some(0));
    }

    #[test]
    fn removal_subscription_receives_the_removed_item() {
        let first: Arc<dyn PlaylistItem> = Arc::new(DummyItem(Mutex::new(-1.0)));
        let second: Arc<dyn PlaylistItem> = Arc::new(DummyItem(Mutex::new(-1.0)));
        let pl = VecPlaylist::new(vec![Arc::clone(&first), Arc::clone(&second)]);

        let seen: Arc<Mutex<Vec<Arc<dyn PlaylistItem>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        pl.subscribe_removal(Box::new(move |removed| {
            seen_clone.lock().unwrap().push(removed);
        }));

        pl.remove(0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(Arc::ptr_eq(&seen[0], &first));
    }
}
