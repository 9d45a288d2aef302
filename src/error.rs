use thiserror::Error;

/// Rejected configuration. Always fatal, reported before any thread starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("a serial port is required (use --port, or --simulate)")]
    MissingPort,

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("buffer capacity must be at least one sample")]
    Capacity,

    #[error("window of {window_seconds} s at {sample_rate_hz} Hz is too many samples to buffer")]
    CapacityOverflow {
        window_seconds: u32,
        sample_rate_hz: u32,
    },

    #[error("cannot allocate a buffer of {capacity} samples (limit {max})")]
    CapacityTooLarge { capacity: usize, max: usize },

    #[error("plot range is empty: y-min {y_min} >= y-max {y_max}")]
    PlotRange { y_min: f32, y_max: f32 },

    #[error("settings file {path}: {message}")]
    Settings { path: String, message: String },

    #[error("failed to open serial port '{port}': {message}")]
    OpenPort { port: String, message: String },
}

/// Failure of the sample source. Fatal to the producer loop.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("device read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("device disconnected: {0}")]
    Disconnected(String),
}

/// Failure to hand a sample to the outward stream. Never fatal to buffering.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("outlet rejected sample: {0}")]
    Rejected(String),

    #[error("failed to create outlet '{name}': {message}")]
    Create { name: String, message: String },
}
