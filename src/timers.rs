//! Liveness timers of a connection
//!
//! Timers never act on the connection themselves. Each one posts a
//! [`TimerEvent`] to the connection worker, which handles it in order with
//! socket events.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// Event posted by a timer to the connection worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// No frame received within the connection timeout
    ConnectionTimeout,
    /// Time to send a ping
    Ping,
    /// No pong received within the pong timeout
    PongTimeout,
}

/// Durations of the timers in a [`TimerSet`]
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    pub connection_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// The independently cancellable timers of one open connection
pub struct TimerSet<E> {
    config: TimerConfig,
    events: UnboundedSender<E>,
    wrap: fn(TimerEvent) -> E,
    last_activity: Arc<Mutex<Instant>>,
    connection: Option<JoinHandle<()>>,
    ping: Option<JoinHandle<()>>,
    pong: Option<JoinHandle<()>>,
    span: tracing::Span,
}

impl<E: Send + 'static> TimerSet<E> {
    /// Timers post `wrap(event)` into `events`
    pub fn new(
        config: TimerConfig,
        events: UnboundedSender<E>,
        wrap: fn(TimerEvent) -> E,
        span: tracing::Span,
    ) -> Self {
        Self {
            config,
            events,
            wrap,
            last_activity: Arc::new(Mutex::new(Instant::now())),
            connection: None,
            ping: None,
            pong: None,
            span,
        }
    }

    /// (Re)create the connection and ping timers
    pub fn start(&mut self) {
        self.cancel_all();
        self.touch();
        self.restart_watchdog();

        let interval = self.config.ping_interval;
        let events = self.events.clone();
        let wrap = self.wrap;
        self.ping = Some(tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                loop {
                    ticker.tick().await;
                    if events.send(wrap(TimerEvent::Ping)).is_err() {
                        break;
                    }
                }
            }
            .instrument(self.span.clone()),
        ));
    }

    /// (Re)create the connection timeout watchdog
    ///
    /// After half the timeout without inbound data the watchdog asks for a
    /// ping once, so that a quiet but healthy peer answers with a pong before
    /// the timeout is reached.
    pub fn restart_watchdog(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }

        let timeout = self.config.connection_timeout;
        let last_activity = self.last_activity.clone();
        let events = self.events.clone();
        let wrap = self.wrap;
        self.connection = Some(tokio::spawn(
            async move {
                let mut pinged_after = None;
                loop {
                    let last = *last_activity.lock();
                    let idle = last.elapsed();
                    if idle >= timeout {
                        tracing::debug!("No data received within {:?}", timeout);
                        let _ = events.send(wrap(TimerEvent::ConnectionTimeout));
                        break;
                    }

                    if idle >= timeout / 2 && pinged_after != Some(last) {
                        if events.send(wrap(TimerEvent::Ping)).is_err() {
                            break;
                        }
                        pinged_after = Some(last);
                    }

                    let deadline = if pinged_after == Some(last) {
                        last + timeout
                    } else {
                        last + timeout / 2
                    };
                    tokio::time::sleep_until(deadline).await;
                }
            }
            .instrument(self.span.clone()),
        ));
    }

    /// Whether no inbound data arrived within the connection timeout
    pub fn is_idle(&self) -> bool {
        self.last_activity.lock().elapsed() >= self.config.connection_timeout
    }

    /// Record inbound activity, pushing the connection timeout back
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Start waiting for a pong. An already armed pong timer is kept.
    pub fn arm_pong(&mut self) {
        if self.pong.as_ref().map_or(false, |pong| !pong.is_finished()) {
            return;
        }

        let timeout = self.config.pong_timeout;
        let events = self.events.clone();
        let wrap = self.wrap;
        self.pong = Some(tokio::spawn(
            async move {
                tokio::time::sleep(timeout).await;
                let _ = events.send(wrap(TimerEvent::PongTimeout));
            }
            .instrument(self.span.clone()),
        ));
    }

    pub fn pong_received(&mut self) {
        if let Some(pong) = self.pong.take() {
            pong.abort();
        }
    }

    pub fn is_waiting_for_pong(&self) -> bool {
        self.pong.as_ref().map_or(false, |pong| !pong.is_finished())
    }

    pub fn cancel_all(&mut self) {
        for timer in [self.connection.take(), self.ping.take(), self.pong.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}

impl<E> Drop for TimerSet<E> {
    fn drop(&mut self) {
        for timer in [self.connection.take(), self.ping.take(), self.pong.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}
