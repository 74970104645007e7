//! # Dance-practice audio player core
//!
//! The real-time pipeline that turns a playlist item into a steady stream of
//! PCM frames delivered to an audio output device: a bounded blocking ring
//! buffer, a decoder worker, a pull-mode tempo/fade effect chain, and a
//! player state machine that drives an output thread.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod ring_buffer;

pub use error::{Error, Result};
