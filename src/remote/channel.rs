//! Persistent remote channel with lazy connect and reconnect-on-failure.

use super::{CommandRunner, Connection, Connector};
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Prints the remote host's numeric UTC offset, e.g. `+0800`.
pub const OFFSET_COMMAND: &str = "date +%z";

/// Attempts per `execute` call: the first try plus one retry after reconnecting.
const MAX_ATTEMPTS: u32 = 2;

enum ChannelState<T> {
    Disconnected,
    Connected(Arc<T>),
}

/// One remote endpoint's connection, shared by every scrape.
///
/// The connection handle sits behind a single async mutex: whoever finds
/// the channel disconnected dials while holding it, so concurrent callers
/// queue behind that one attempt and then reuse its result. Commands run
/// outside the lock, each in its own session.
pub struct Channel<C: Connector> {
    connector: C,
    state: Mutex<ChannelState<C::Connection>>,
    offset_secs: AtomicI32,
    failures: AtomicU32,
}

impl<C: Connector> Channel<C> {
    /// Create a disconnected channel. Nothing is dialled until first use.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: Mutex::new(ChannelState::Disconnected),
            offset_secs: AtomicI32::new(0),
            failures: AtomicU32::new(0),
        }
    }

    /// Establish the connection now instead of on first `execute`.
    pub async fn connect(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    /// Tear down the current connection, if any.
    pub async fn disconnect(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, ChannelState::Disconnected)
        };
        if let ChannelState::Connected(conn) = previous {
            conn.close().await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ChannelState::Connected(_))
    }

    /// Consecutive failed attempts since the last successful command.
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn session(&self) -> Result<Arc<C::Connection>> {
        let mut state = self.state.lock().await;
        if let ChannelState::Connected(conn) = &*state {
            return Ok(Arc::clone(conn));
        }

        let conn = match self.connector.connect().await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                error!(error = %e, "Failed to connect to remote host");
                return Err(e);
            }
        };
        info!("Connected to remote host");

        self.calibrate(&conn).await;
        *state = ChannelState::Connected(Arc::clone(&conn));
        Ok(conn)
    }

    async fn calibrate(&self, conn: &C::Connection) {
        let offset = match conn.run(OFFSET_COMMAND).await {
            Ok(output) => parse_utc_offset(&output),
            Err(e) => {
                debug!(error = %e, "Could not read remote UTC offset");
                None
            }
        };

        let secs = offset.map(|o| o.local_minus_utc()).unwrap_or(0);
        if offset.is_none() {
            debug!("Remote UTC offset unknown, assuming UTC");
        } else {
            info!(offset_secs = secs, "Measured remote clock offset");
        }
        self.offset_secs.store(secs, Ordering::Relaxed);
    }

    /// Drop `conn` if it is still the current connection.
    async fn invalidate(&self, conn: &Arc<C::Connection>) {
        let stale = {
            let mut state = self.state.lock().await;
            let is_current = matches!(
                &*state,
                ChannelState::Connected(current) if Arc::ptr_eq(current, conn)
            );
            if is_current {
                *state = ChannelState::Disconnected;
            }
            is_current
        };
        if stale {
            conn.close().await;
        }
    }
}

#[async_trait]
impl<C: Connector> CommandRunner for Channel<C> {
    async fn execute(&self, command: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let conn = match self.session().await {
                Ok(conn) => conn,
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    last_error = Some(e);
                    continue;
                }
            };

            match conn.run(command).await {
                Ok(output) => {
                    self.failures.store(0, Ordering::Relaxed);
                    return Ok(output);
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(attempt, command, error = %e, "Remote command failed, reconnecting");
                    self.invalidate(&conn).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ExporterError::exec_error(format!("{:?} failed without an error", command))
        }))
    }

    fn clock_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.offset_secs.load(Ordering::Relaxed)).unwrap_or_else(|| Utc.fix())
    }
}

/// Parse a 5-character signed `HHMM` offset such as `+0800` or `-0530`.
pub fn parse_utc_offset(text: &str) -> Option<FixedOffset> {
    let token = text.trim();
    if token.len() != 5 || !token.is_ascii() {
        return None;
    }

    let sign = match token.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = &token[1..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        dials: AtomicUsize,
        closed: AtomicUsize,
        failing_dials: AtomicUsize,
        failing_runs: AtomicUsize,
    }

    struct TestConnector {
        counters: Arc<Counters>,
        offset: &'static str,
        dial_delay: Duration,
    }

    struct TestConnection {
        id: usize,
        counters: Arc<Counters>,
        offset: &'static str,
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl Connector for TestConnector {
        type Connection = TestConnection;

        async fn connect(&self) -> Result<TestConnection> {
            tokio::time::sleep(self.dial_delay).await;
            let id = self.counters.dials.fetch_add(1, Ordering::SeqCst) + 1;
            if take_one(&self.counters.failing_dials) {
                return Err(ExporterError::connect_error("connection refused"));
            }
            Ok(TestConnection {
                id,
                counters: Arc::clone(&self.counters),
                offset: self.offset,
            })
        }
    }

    #[async_trait]
    impl Connection for TestConnection {
        async fn run(&self, command: &str) -> Result<String> {
            if command == OFFSET_COMMAND {
                return Ok(format!("{}\n", self.offset));
            }
            if take_one(&self.counters.failing_runs) {
                return Err(ExporterError::exec_error("session open failed"));
            }
            Ok(format!("{}:{}", self.id, command))
        }

        async fn close(&self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_channel(offset: &'static str) -> (Channel<TestConnector>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let connector = TestConnector {
            counters: Arc::clone(&counters),
            offset,
            dial_delay: Duration::ZERO,
        };
        (Channel::new(connector), counters)
    }

    #[tokio::test]
    async fn test_lazy_connect_on_first_execute() {
        let (channel, counters) = test_channel("+0000");
        assert!(!channel.is_connected().await);
        assert_eq!(counters.dials.load(Ordering::SeqCst), 0);

        assert_eq!(channel.execute("uptime").await.unwrap(), "1:uptime");
        assert_eq!(channel.execute("uptime").await.unwrap(), "1:uptime");
        assert!(channel.is_connected().await);
        assert_eq!(counters.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clock_offset_measured_on_connect() {
        let (channel, _) = test_channel("+0800");
        channel.connect().await.unwrap();
        assert_eq!(channel.clock_offset().local_minus_utc(), 8 * 3600);

        let (unknown, _) = test_channel("garbage");
        unknown.connect().await.unwrap();
        assert_eq!(unknown.clock_offset().local_minus_utc(), 0);
    }

    #[tokio::test]
    async fn test_reconnects_once_after_session_failure() {
        let (channel, counters) = test_channel("+0000");
        channel.connect().await.unwrap();
        counters.failing_runs.store(1, Ordering::SeqCst);

        assert_eq!(channel.execute("cat /proc/loadavg").await.unwrap(), "2:cat /proc/loadavg");
        assert_eq!(counters.dials.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(channel.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_and_stays_disconnected() {
        let (channel, counters) = test_channel("+0000");
        counters.failing_runs.store(2, Ordering::SeqCst);

        let err = channel.execute("df").await.unwrap_err();
        assert!(matches!(err, ExporterError::Exec(_)));
        assert!(!channel.is_connected().await);
        assert_eq!(channel.failure_count(), 2);

        assert_eq!(channel.execute("df").await.unwrap(), "3:df");
        assert_eq!(channel.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_failed_dial() {
        let (channel, counters) = test_channel("+0000");
        counters.failing_dials.store(1, Ordering::SeqCst);
        assert_eq!(channel.execute("true").await.unwrap(), "2:true");

        counters.failing_dials.store(2, Ordering::SeqCst);
        channel.disconnect().await;
        let err = channel.execute("true").await.unwrap_err();
        assert!(matches!(err, ExporterError::Connect(_)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_dial() {
        let counters = Arc::new(Counters::default());
        let channel = Arc::new(Channel::new(TestConnector {
            counters: Arc::clone(&counters),
            offset: "+0000",
            dial_delay: Duration::from_millis(50),
        }));

        let calls = (0..8).map(|i| {
            let channel = Arc::clone(&channel);
            async move { channel.execute(&format!("echo {}", i)).await }
        });
        let results = futures_util::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(counters.dials.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+0000\n").map(|o| o.local_minus_utc()), Some(0));
        assert_eq!(parse_utc_offset("+0800").map(|o| o.local_minus_utc()), Some(28_800));
        assert_eq!(parse_utc_offset("-0530").map(|o| o.local_minus_utc()), Some(-19_800));
        assert!(parse_utc_offset("+08").is_none());
        assert!(parse_utc_offset("08000").is_none());
        assert!(parse_utc_offset("+08a0").is_none());
        assert!(parse_utc_offset("").is_none());
    }
}
