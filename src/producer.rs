use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::publish::Publisher;
use crate::ring::RingBuffer;
use crate::shutdown::{Shutdown, ShutdownReason};
use crate::source::{SampleSource, SourceEvent};

#[derive(Clone, Debug, PartialEq)]
pub enum ProducerExit {
    Interrupted,
    EndOfStream,
    DeviceError(String),
    /// The producer thread panicked; the buffer keeps what it had.
    Panicked,
}

impl fmt::Display for ProducerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerExit::Interrupted => write!(f, "stopped"),
            ProducerExit::EndOfStream => write!(f, "input ended"),
            ProducerExit::DeviceError(message) => write!(f, "device error: {message}"),
            ProducerExit::Panicked => write!(f, "panicked"),
        }
    }
}

/// Counters the producer keeps for diagnostics. Readable from any thread.
#[derive(Default)]
pub struct ProducerStats {
    accepted: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    publish_failed: AtomicU64,
    running: AtomicBool,
    exit: Mutex<Option<ProducerExit>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub malformed: u64,
    pub published: u64,
    pub publish_failed: u64,
    pub running: bool,
    pub exit: Option<ProducerExit>,
}

impl ProducerStats {
    fn finish(&self, exit: ProducerExit) {
        *self.exit.lock() = Some(exit);
        self.running.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Acquire),
            exit: self.exit.lock().clone(),
        }
    }
}

/// The single writer: pulls samples from the source, buffers them and hands
/// them to the publisher, until shutdown, end of input or a device error.
pub struct Producer {
    source: Box<dyn SampleSource>,
    publisher: Box<dyn Publisher>,
    clock: Box<dyn Clock>,
    ring: Arc<RingBuffer>,
    stats: Arc<ProducerStats>,
    shutdown: Shutdown,
}

impl Producer {
    pub fn new(
        source: Box<dyn SampleSource>,
        publisher: Box<dyn Publisher>,
        clock: Box<dyn Clock>,
        ring: Arc<RingBuffer>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            publisher,
            clock,
            ring,
            stats: Arc::new(ProducerStats::default()),
            shutdown,
        }
    }

    pub fn stats(&self) -> Arc<ProducerStats> {
        Arc::clone(&self.stats)
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<ProducerExit>> {
        std::thread::Builder::new()
            .name("producer".into())
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> ProducerExit {
        self.stats.running.store(true, Ordering::Release);
        let _guard = PanicGuard {
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.clone(),
        };
        log::info!("Reading samples from {}", self.source.describe());

        let exit = loop {
            if self.shutdown.is_requested() {
                break ProducerExit::Interrupted;
            }
            match self.source.next_event() {
                Ok(SourceEvent::Value(value)) => self.accept(value),
                Ok(SourceEvent::Malformed(line)) => {
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Discarding malformed line: {line:?}");
                }
                Ok(SourceEvent::Idle) => {}
                Ok(SourceEvent::End) => {
                    log::warn!("{} closed", self.source.describe());
                    break ProducerExit::EndOfStream;
                }
                Err(err) => {
                    log::error!("{}: {err}", self.source.describe());
                    break ProducerExit::DeviceError(err.to_string());
                }
            }
        };

        self.stats.finish(exit.clone());
        let totals = self.stats.snapshot();
        log::info!(
            "Producer {exit}: {} accepted, {} malformed, {} published, {} publish failures",
            totals.accepted,
            totals.malformed,
            totals.published,
            totals.publish_failed
        );
        self.shutdown.notify(ShutdownReason::ProducerStopped(exit.clone()));
        exit
    }

    fn accept(&mut self, value: f32) {
        let timestamp = self.clock.now();
        self.ring.append(value, timestamp);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        match self.publisher.publish(value, timestamp) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                let failed = self.stats.publish_failed.fetch_add(1, Ordering::Relaxed);
                if failed == 0 {
                    log::warn!("Publishing failed, buffering continues: {err}");
                } else {
                    log::debug!("Publishing failed: {err}");
                }
            }
        }
    }
}

/// Records a panic as the producer's exit so waiters are not left blocked.
struct PanicGuard {
    stats: Arc<ProducerStats>,
    shutdown: Shutdown,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("Producer panicked, buffer frozen");
            self.stats.finish(ProducerExit::Panicked);
            self.shutdown
                .notify(ShutdownReason::ProducerStopped(ProducerExit::Panicked));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::{PublishError, SourceError};
    use crate::shutdown;
    use crate::source::LineSource;

    /// Ticks forward a millisecond per read.
    #[derive(Default)]
    struct StepClock(Mutex<f64>);

    impl Clock for StepClock {
        fn now(&self) -> f64 {
            let mut t = self.0.lock();
            let now = *t;
            *t += 0.001;
            now
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(f32, f64)>>>);

    impl Publisher for Recorder {
        fn publish(&mut self, value: f32, timestamp: f64) -> Result<(), PublishError> {
            self.0.lock().push((value, timestamp));
            Ok(())
        }
    }

    struct Refusing;

    impl Publisher for Refusing {
        fn publish(&mut self, _: f32, _: f64) -> Result<(), PublishError> {
            Err(PublishError::Rejected("outlet gone".into()))
        }
    }

    fn producer(
        input: &str,
        publisher: Box<dyn Publisher>,
        capacity: usize,
    ) -> (Producer, Arc<RingBuffer>) {
        let ring = Arc::new(RingBuffer::new(capacity).unwrap());
        let (shutdown, _waiter) = shutdown::channel();
        let source = LineSource::new(Cursor::new(input.as_bytes().to_vec()), "test");
        let producer = Producer::new(
            Box::new(source),
            publisher,
            Box::new(StepClock::default()),
            Arc::clone(&ring),
            shutdown,
        );
        (producer, ring)
    }

    #[test]
    fn buffers_and_publishes_same_timestamps() {
        let recorder = Recorder::default();
        let (producer, ring) = producer("1\n2\nabc\n\n3\n", Box::new(recorder.clone()), 8);
        let stats = producer.stats();
        assert_eq!(producer.run(), ProducerExit::EndOfStream);

        let snap = ring.snapshot();
        assert_eq!(snap.values, vec![1.0, 2.0, 3.0]);
        let published = recorder.0.lock().clone();
        let expected: Vec<(f32, f64)> = snap
            .values
            .iter()
            .copied()
            .zip(snap.timestamps.iter().copied())
            .collect();
        assert_eq!(published, expected);

        let stats = stats.snapshot();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.published, 3);
        assert!(!stats.running);
        assert_eq!(stats.exit, Some(ProducerExit::EndOfStream));
    }

    #[test]
    fn malformed_line_never_reaches_the_ring() {
        let (producer, ring) = producer("abc\n", Box::new(Recorder::default()), 4);
        producer.run();
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn publish_failures_do_not_stop_buffering() {
        let (producer, ring) = producer("1\n2\n3\n4\n5\n", Box::new(Refusing), 3);
        let stats = producer.stats();
        assert_eq!(producer.run(), ProducerExit::EndOfStream);
        assert_eq!(ring.snapshot().values, vec![3.0, 4.0, 5.0]);
        let stats = stats.snapshot();
        assert_eq!(stats.accepted, 5);
        assert_eq!(stats.published, 0);
        assert_eq!(stats.publish_failed, 5);
    }

    struct FailsAfter {
        left: usize,
    }

    impl SampleSource for FailsAfter {
        fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
            if self.left == 0 {
                return Err(SourceError::Disconnected("cable pulled".into()));
            }
            self.left -= 1;
            Ok(SourceEvent::Value(self.left as f32))
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    #[test]
    fn device_error_stops_producer_and_keeps_buffer() {
        let ring = Arc::new(RingBuffer::new(10).unwrap());
        let (shutdown, waiter) = shutdown::channel();
        let producer = Producer::new(
            Box::new(FailsAfter { left: 2 }),
            Box::new(Recorder::default()),
            Box::new(StepClock::default()),
            Arc::clone(&ring),
            shutdown,
        );
        let exit = producer.run();
        assert!(matches!(exit, ProducerExit::DeviceError(ref m) if m.contains("cable pulled")));
        assert_eq!(ring.snapshot().values, vec![1.0, 0.0]);
        assert_eq!(waiter.poll(), Some(ShutdownReason::ProducerStopped(exit)));
    }

    #[test]
    fn shutdown_request_stops_before_next_read() {
        let ring = Arc::new(RingBuffer::new(10).unwrap());
        let (shutdown, _waiter) = shutdown::channel();
        shutdown.request(ShutdownReason::Interrupt);
        let producer = Producer::new(
            Box::new(FailsAfter { left: 100 }),
            Box::new(Recorder::default()),
            Box::new(StepClock::default()),
            Arc::clone(&ring),
            shutdown,
        );
        assert_eq!(producer.run(), ProducerExit::Interrupted);
        assert!(ring.is_empty());
    }

    struct Exploding;

    impl Publisher for Exploding {
        fn publish(&mut self, _: f32, _: f64) -> Result<(), PublishError> {
            panic!("outlet blew up");
        }
    }

    #[test]
    fn panic_is_recorded_and_reported() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let (shutdown, waiter) = shutdown::channel();
        let source = LineSource::new(Cursor::new(b"7\n8\n".to_vec()), "test");
        let producer = Producer::new(
            Box::new(source),
            Box::new(Exploding),
            Box::new(StepClock::default()),
            Arc::clone(&ring),
            shutdown,
        );
        let stats = producer.stats();
        let handle = producer.spawn().unwrap();

        assert!(handle.join().is_err());
        assert_eq!(ring.snapshot().values, vec![7.0]);
        let stats = stats.snapshot();
        assert!(!stats.running);
        assert_eq!(stats.exit, Some(ProducerExit::Panicked));
        assert_eq!(
            waiter.poll(),
            Some(ShutdownReason::ProducerStopped(ProducerExit::Panicked))
        );
    }
}
