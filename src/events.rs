//! Player event stream.
//!
//! One-to-many broadcast from the output thread to any observer (CLI
//! printer, future UI). The realtime path never awaits on this; `emit_lossy`
//! is used from the output thread so a slow/absent subscriber never stalls
//! playback.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// About to begin decoding and wait for the first frame.
    StartingPlayback { item_name: String },
    /// Device started pulling from the new track's chain.
    StartedPlayback { item_name: String },
    /// The chain reached terminal EOF (track ended, was faded out, or was
    /// skipped as unplayable).
    FinishedPlayback,
    /// A track could not be opened/decoded and was skipped without playing.
    InvalidTrackSkipped { item_name: String },
    /// The tempo coefficient in effect changed (live or on track start).
    TempoCoeffChanged { item_name: String, tempo: f64 },
}

pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Emits an event, failing if there are no subscribers.
    pub fn emit(&self, event: PlayerEvent) -> Result<(), PlayerEvent> {
        self.sender.send(event).map(|_| ()).map_err(|e| e.0)
    }

    /// Emits an event, silently dropping it if there are no subscribers.
    /// Used from the output thread, which must never block or panic on a
    /// missing listener.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_errors() {
        let bus = EventBus::new(8);
        let result = bus.emit(PlayerEvent::FinishedPlayback);
        assert!(result.is_err());
    }

    #[test]
    fn emit_lossy_never_panics_without_subscribers() {
        let bus = EventBus::new(8);
        bus.emit_lossy(PlayerEvent::FinishedPlayback);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(PlayerEvent::TempoCoeffChanged {
            item_name: "track".into(),
            tempo: 1.5,
        })
        .unwrap();
        match rx.recv().await.unwrap() {
            PlayerEvent::TempoCoeffChanged { tempo, .. } => assert_eq!(tempo, 1.5),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
