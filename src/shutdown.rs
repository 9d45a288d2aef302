use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::producer::ProducerExit;

#[derive(Clone, Debug, PartialEq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM / Ctrl+C.
    Interrupt,
    /// The plot window was closed.
    WindowClosed,
    ProducerStopped(ProducerExit),
}

/// Sending half: raises the stop flag the producer polls and wakes whoever
/// waits on the [`ShutdownWaiter`].
#[derive(Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    tx: Sender<ShutdownReason>,
}

/// Receiving half. Clones share one queue: each reason reaches one of them.
#[derive(Clone)]
pub struct ShutdownWaiter {
    rx: Receiver<ShutdownReason>,
}

pub fn channel() -> (Shutdown, ShutdownWaiter) {
    let (tx, rx) = channel::unbounded();
    (
        Shutdown {
            requested: Arc::new(AtomicBool::new(false)),
            tx,
        },
        ShutdownWaiter { rx },
    )
}

impl Shutdown {
    /// Ask every component to stop.
    pub fn request(&self, reason: ShutdownReason) {
        self.requested.store(true, Ordering::SeqCst);
        let _ = self.tx.send(reason);
    }

    /// Report an event without asking anyone else to stop.
    pub fn notify(&self, reason: ShutdownReason) {
        let _ = self.tx.send(reason);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Route Ctrl+C and SIGTERM into this channel.
    pub fn install_interrupt_handler(&self) -> Result<(), ctrlc::Error> {
        let shutdown = self.clone();
        ctrlc::set_handler(move || {
            log::info!("Interrupt received, stopping stream");
            shutdown.request(ShutdownReason::Interrupt);
        })
    }
}

impl ShutdownWaiter {
    /// Blocks until some component reports a reason to stop.
    pub fn wait(&self) -> ShutdownReason {
        // All senders gone means nobody is left to keep the process alive.
        self.rx.recv().unwrap_or(ShutdownReason::Interrupt)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReason> {
        match self.rx.recv_timeout(timeout) {
            Ok(reason) => Some(reason),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(ShutdownReason::Interrupt),
        }
    }

    pub fn poll(&self) -> Option<ShutdownReason> {
        match self.rx.try_recv() {
            Ok(reason) => Some(reason),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(ShutdownReason::Interrupt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_flag_and_wakes_waiter() {
        let (shutdown, waiter) = channel();
        assert!(!shutdown.is_requested());
        assert_eq!(waiter.poll(), None);

        let remote = shutdown.clone();
        let handle = std::thread::spawn(move || remote.request(ShutdownReason::WindowClosed));
        assert_eq!(waiter.wait(), ShutdownReason::WindowClosed);
        handle.join().unwrap();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn wait_timeout_gives_up() {
        let (_shutdown, waiter) = channel();
        assert_eq!(waiter.wait_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn notify_leaves_flag_alone() {
        let (shutdown, waiter) = channel();
        shutdown.notify(ShutdownReason::ProducerStopped(ProducerExit::EndOfStream));
        assert!(!shutdown.is_requested());
        assert_eq!(
            waiter.poll(),
            Some(ShutdownReason::ProducerStopped(ProducerExit::EndOfStream))
        );
    }
}
