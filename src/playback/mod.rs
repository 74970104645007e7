pub mod buffer;
pub mod decoder;
pub mod effects;
pub mod player;
pub mod playlist;

pub use buffer::PlaybackBuffer;
pub use player::{Player, PlayerState};
pub use playlist::{Playlist, PlaylistItem};
