use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::frame::Frame;
use super::registry::ConnectionRegistry;

/// Configuration for heartbeat sweeps
#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// When false `start` is a no-op
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

impl HeartbeatConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatState {
    Stopped,
    Running,
}

/// Stats for heartbeat sweeps
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub sweeps: u64,
    pub total_sent: u64,
    pub total_failed: u64,
}

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sent: usize,
    /// Connections still replaying.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    sweeps: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

struct RunningTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Periodically writes a keep-alive comment to every attached connection.
///
/// Proxies drop idle streams; a comment frame keeps them open without the
/// client seeing an event. A connection whose write fails is evicted.
pub struct HeartbeatDriver {
    config: HeartbeatConfig,
    registry: Arc<ConnectionRegistry>,
    counters: Arc<Counters>,
    task: Mutex<Option<RunningTask>>,
}

impl HeartbeatDriver {
    pub fn new(registry: Arc<ConnectionRegistry>, config: HeartbeatConfig) -> Self {
        Self {
            config,
            registry,
            counters: Arc::new(Counters::default()),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> HeartbeatState {
        match &*self.task.lock() {
            Some(task) if !task.handle.is_finished() => HeartbeatState::Running,
            _ => HeartbeatState::Stopped,
        }
    }

    /// Spawn the sweep loop. Returns `false` if it was already running or
    /// heartbeats are disabled. Must be called inside a tokio runtime.
    pub fn start(&self) -> bool {
        if !self.config.enabled || self.config.interval.is_zero() {
            debug!("Heartbeat disabled");
            return false;
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(sweep_loop(
            self.registry.clone(),
            self.counters.clone(),
            self.config.interval,
            shutdown.clone(),
        ));
        *task = Some(RunningTask { shutdown, handle });

        info!(interval_secs = self.config.interval.as_secs_f64(), "Heartbeat started");
        true
    }

    /// Stop the sweep loop and wait for it to exit. Returns `false` if it
    /// was not running.
    pub async fn stop(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        task.shutdown.notify_one();
        if let Err(err) = task.handle.await {
            warn!(error = %err, "Heartbeat task ended abnormally");
        }
        info!("Heartbeat stopped");
        true
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> SweepReport {
        sweep(&self.registry, &self.counters)
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            sweeps: self.counters.sweeps.load(Ordering::Relaxed),
            total_sent: self.counters.sent.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for HeartbeatDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.handle.abort();
        }
    }
}

async fn sweep_loop(
    registry: Arc<ConnectionRegistry>,
    counters: Arc<Counters>,
    period: Duration,
    shutdown: Arc<Notify>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry, &counters);
            }
            _ = shutdown.notified() => break,
        }
    }
}

fn sweep(registry: &ConnectionRegistry, counters: &Counters) -> SweepReport {
    let frame = Frame::heartbeat();
    let mut report = SweepReport::default();

    for connection in registry.connections() {
        match connection.keepalive(&frame) {
            Ok(true) => report.sent += 1,
            Ok(false) => report.skipped += 1,
            Err(source) => {
                report.failed += 1;
                registry.evict_failed(&connection, source, "heartbeat");
            }
        }
    }

    counters.sweeps.fetch_add(1, Ordering::Relaxed);
    counters.sent.fetch_add(report.sent as u64, Ordering::Relaxed);
    counters
        .failed
        .fetch_add(report.failed as u64, Ordering::Relaxed);

    if report.sent + report.failed > 0 {
        debug!(
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Heartbeat sweep"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::Connection;
    use crate::realtime::frame::HEARTBEAT_FRAME;

    fn attach(
        registry: &ConnectionRegistry,
        channels: &[&str],
    ) -> (Arc<Connection>, tokio::sync::mpsc::Receiver<bytes::Bytes>) {
        let (conn, rx) = Connection::new(
            "user",
            channels.iter().map(|c| c.to_string()).collect(),
            4,
            None,
        );
        for channel in channels {
            registry.attach(channel, &conn);
        }
        (conn, rx)
    }

    #[test]
    fn test_one_frame_per_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        for channels in [&["a"][..], &["a", "b"][..], &["c"][..]] {
            receivers.push(attach(&registry, channels).1);
        }
        let driver = HeartbeatDriver::new(registry, HeartbeatConfig::default());

        let report = driver.sweep();
        assert_eq!(report.sent, 3);

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap().as_ref(), HEARTBEAT_FRAME.as_bytes());
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_failed_connection_is_removed_and_sweep_continues() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_gone, gone_rx) = attach(&registry, &["a"]);
        let (_kept, mut kept_rx) = attach(&registry, &["a"]);
        drop(gone_rx);

        let driver = HeartbeatDriver::new(registry.clone(), HeartbeatConfig::default());
        let report = driver.sweep();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(registry.count(), 1);
        assert!(kept_rx.try_recv().is_ok());
        assert_eq!(driver.stats().total_failed, 1);
    }

    #[test]
    fn test_replaying_connection_is_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = Connection::new("user", vec!["a".into()], 4, Some(4));
        registry.attach("a", &conn);

        let driver = HeartbeatDriver::new(registry, HeartbeatConfig::default());
        assert_eq!(driver.sweep().skipped, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_sweeps_on_interval_until_stopped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_conn, mut rx) = attach(&registry, &["a"]);
        let driver =
            HeartbeatDriver::new(registry, HeartbeatConfig::every(Duration::from_secs(30)));

        assert!(driver.start());
        assert!(!driver.start());
        assert_eq!(driver.state(), HeartbeatState::Running);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_ok());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_ok());

        assert!(driver.stop().await);
        assert!(!driver.stop().await);
        assert_eq!(driver.state(), HeartbeatState::Stopped);
        assert_eq!(driver.stats().sweeps, 2);
    }

    #[tokio::test]
    async fn test_disabled_driver_does_not_start() {
        let driver = HeartbeatDriver::new(
            Arc::new(ConnectionRegistry::new()),
            HeartbeatConfig {
                enabled: false,
                ..HeartbeatConfig::default()
            },
        );
        assert!(!driver.start());
        assert_eq!(driver.state(), HeartbeatState::Stopped);
    }
}
