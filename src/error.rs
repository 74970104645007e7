//! Error taxonomy for the playback pipeline.
//!
//! Inside the pipeline, decode/output/resample failures are converted to EOF
//! as early as possible (see `playback::decoder`) so a consumer only ever
//! observes one failure mode: a short read followed by zero bytes. This enum
//! exists for logging and for the CLI layer's top-level propagation, not for
//! cross-thread control flow.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures while opening, demuxing, or decoding a source file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open '{path}': {message}")]
    Open { path: String, message: String },

    #[error("unsupported container for '{path}'")]
    UnsupportedContainer { path: String },

    #[error("no audio track found in '{path}'")]
    NoAudioTrack { path: String },

    /// Recovered by demuxer resync; logged, never surfaced to a reader.
    #[error("transient decode error, resyncing: {0}")]
    Resync(String),

    /// Demuxer could not resync; the worker sets EOF.
    #[error("fatal decode error: {0}")]
    Fatal(String),
}

/// Failures opening or driving the audio output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device available")]
    NoDevice,

    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    #[error("no supported output configuration for device '{device}'")]
    UnsupportedConfig { device: String },

    #[error("failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("failed to start output stream: {0}")]
    StreamPlay(String),
}

/// Failures building or running the tempo resampler.
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("failed to initialize resampler ({source_rate}Hz -> {target_rate}Hz): {message}")]
    Init {
        source_rate: u32,
        target_rate: u32,
        message: String,
    },

    #[error("resampler processing error: {0}")]
    Process(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}
