pub mod device;
pub mod format;

pub use format::AudioFormat;
