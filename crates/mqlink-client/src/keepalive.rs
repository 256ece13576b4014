//! Keep-alive bookkeeping and the timer thread that drives it.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};
use log::debug;

/// What the session should do on a keep-alive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveAction {
    Nothing,
    SendPing,
    TimedOut,
}

/// Ping timing for the current connection.
#[derive(Debug)]
pub(crate) struct KeepaliveState {
    /// Interval asked for in CONNECT
    requested: Duration,
    /// Interval in effect, possibly lowered by the server
    interval: Duration,
    last_ping: Instant,
    /// PINGREQs sent since the last PINGRESP
    pending_pings: u32,
}

impl KeepaliveState {
    pub fn new(requested: Duration) -> Self {
        Self {
            requested,
            interval: requested,
            last_ping: Instant::now(),
            pending_pings: 0,
        }
    }

    /// Start timing a fresh connection.
    pub fn reset(&mut self, requested: Duration, now: Instant) {
        self.requested = requested;
        self.interval = requested;
        self.last_ping = now;
        self.pending_pings = 0;
    }

    /// Apply a server keep alive from CONNACK. The effective interval is the
    /// smaller of the two; a server value of 0 leaves the requested one.
    pub fn adopt_server(&mut self, server: Duration) -> bool {
        if self.requested.is_zero() || server.is_zero() || server >= self.requested {
            return false;
        }
        self.interval = server;
        true
    }

    pub fn on_pingresp(&mut self) {
        self.pending_pings = 0;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[cfg(test)]
    pub fn pending_pings(&self) -> u32 {
        self.pending_pings
    }

    /// Decide whether a ping is due at `now`.
    ///
    /// Counts the ping as sent when returning [`KeepaliveAction::SendPing`].
    /// `max_missed` of 0 never times out.
    pub fn poll(&mut self, now: Instant, max_missed: u32) -> KeepaliveAction {
        if self.interval.is_zero() || now.saturating_duration_since(self.last_ping) < self.interval
        {
            return KeepaliveAction::Nothing;
        }
        if max_missed > 0 && self.pending_pings >= max_missed {
            return KeepaliveAction::TimedOut;
        }
        self.last_ping = now;
        self.pending_pings += 1;
        KeepaliveAction::SendPing
    }
}

/// Timer thread invoking a callback every tick until stopped.
pub(crate) struct KeepaliveScheduler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepaliveScheduler {
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(period);

        let handle = thread::Builder::new()
            .name("mqlink-keepalive".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(ticker) -> _ => on_tick(),
                        recv(stop_rx) -> _ => break,
                    }
                }
                debug!("Keepalive scheduler stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for the thread to exit.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the select.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Keepalive thread panicked");
            }
        }
    }
}

impl Drop for KeepaliveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
