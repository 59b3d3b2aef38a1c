use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, tick, Receiver, Sender};

/// Periodic redraw scheduler.
///
/// The clock fires at a fixed wall-clock interval regardless of what the
/// audio device is doing. Ticks that are not collected in time are dropped
/// rather than queued, so a slow redraw never builds a backlog.
#[derive(Debug)]
pub struct FrameClock {
    interval: Duration,
    ticker: Receiver<Instant>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    stopped: bool,
    ticks: u64,
}

impl FrameClock {
    pub fn new(interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = bounded(1);
        Self {
            interval,
            ticker: tick(interval),
            shutdown_tx,
            shutdown_rx,
            stopped: false,
            ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks delivered so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Handle that ends the clock from another thread.
    pub fn stopper(&self) -> ClockStopper {
        ClockStopper {
            shutdown: self.shutdown_tx.clone(),
        }
    }

    /// Blocks until the next tick. Returns `None` once stopped.
    pub fn next_tick(&mut self) -> Option<Instant> {
        if self.stopped || self.shutdown_rx.try_recv().is_ok() {
            self.stopped = true;
            return None;
        }

        select! {
            recv(self.shutdown_rx) -> _ => {
                self.stopped = true;
                None
            }
            recv(self.ticker) -> at => {
                let at = at.ok()?;
                self.ticks += 1;
                Some(at)
            }
        }
    }
}

/// Ends a [`FrameClock`]; every later `next_tick` returns `None`.
#[derive(Debug, Clone)]
pub struct ClockStopper {
    shutdown: Sender<()>,
}

impl ClockStopper {
    pub fn stop(&self) {
        let _ = self.shutdown.try_send(());
    }
}
