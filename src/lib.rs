//! Serial ECG acquisition: a single producer thread reads decimal samples
//! from a device, keeps a rolling window in a [`ring::RingBuffer`] and
//! republishes each sample on an outward real-time stream. An optional
//! window renders the buffered signal as it scrolls.

pub mod clock;
pub mod config;
pub mod error;
pub mod producer;
pub mod publish;
pub mod ring;
pub mod shutdown;
pub mod simulate;
pub mod source;
pub mod ui;

pub use ring::{RingBuffer, Sample, Snapshot};
