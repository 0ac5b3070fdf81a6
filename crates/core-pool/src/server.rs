//! Per-server connection state machine
//!
//! A [`Server`] owns everything the pool knows about one backend address:
//! request pacing, the open-connection budget, idle connections and the
//! down/backoff state. All of it sits behind one lock per server, so servers
//! never contend with each other.
//!
//! Acquisition order:
//!
//! ```text
//! acquire()
//!   → paced too closely?          → RateLimited (too frequent request)
//!   → idle connection available?  → reuse it
//!   → all slots taken?            → RateLimited (too many open connections)
//!   → down and backoff pending?   → ServerDown (retry after ...)
//!   → dial (connect timeout, cancellable)
//!       → failed  → mark down, schedule next retry, ServerDown
//!       → success → count the slot, reset backoff if recovering
//! ```

use crate::backoff::ExponentialBackoff;
use crate::clock::Clock;
use crate::config::PoolConfig;
use crate::conn::PooledConn;
use crate::containers::IdleQueue;
use crate::dialer::{Dialer, Transport};
use crate::error::{DialError, DownCause, PoolError, RateLimitReason, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mutable server state, only touched under the server lock
struct ServerState<C> {
    /// Dialed and not yet closed, idle or in use
    open_count: usize,
    idle: IdleQueue<C>,
    /// Last attempt that passed the pacing check
    last_acquisition: Option<Instant>,
    down: bool,
    /// Dials are refused before this point while down
    next_retry: Option<Instant>,
    backoff: ExponentialBackoff,
}

impl<C> ServerState<C> {
    fn pacing_wait(&self, now: Instant, interval: Duration) -> Duration {
        match self.last_acquisition {
            Some(last) => interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    fn down_wait(&self, now: Instant) -> Duration {
        match (self.down, self.next_retry) {
            (true, Some(next_retry)) => next_retry.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }
}

/// Point-in-time view of one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub address: String,
    /// Open connections, idle or in use
    pub open: usize,
    /// Connections waiting in the idle queue
    pub idle: usize,
    /// Connections currently handed out
    pub in_use: usize,
    /// Configured connection cap
    pub max_conns: usize,
    pub down: bool,
    /// Advisory wait before the next acquisition may succeed
    pub retry_after: Duration,
}

impl ServerStats {
    /// Share of the connection cap currently open, in percent
    pub fn utilization(&self) -> f64 {
        if self.max_conns == 0 {
            0.0
        } else {
            (self.open as f64 / self.max_conns as f64) * 100.0
        }
    }
}

/// One registered backend endpoint
pub struct Server<D: Dialer> {
    address: String,
    max_conns: usize,
    min_request_interval: Duration,
    connect_timeout: Duration,
    capacity_retry_interval: Duration,
    dialer: Arc<D>,
    clock: Arc<dyn Clock>,
    state: Mutex<ServerState<D::Conn>>,
}

impl<D: Dialer> std::fmt::Debug for Server<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("max_conns", &self.max_conns)
            .field("min_request_interval", &self.min_request_interval)
            .finish_non_exhaustive()
    }
}

impl<D: Dialer> Server<D> {
    pub fn new(address: impl Into<String>, config: &PoolConfig, dialer: Arc<D>) -> Self {
        Self {
            address: address.into(),
            max_conns: config.max_conns_per_server,
            min_request_interval: config.min_request_interval(),
            connect_timeout: config.connect_timeout,
            capacity_retry_interval: config.capacity_retry_interval,
            dialer,
            clock: Arc::clone(&config.clock),
            state: Mutex::new(ServerState {
                open_count: 0,
                idle: IdleQueue::new(),
                last_acquisition: None,
                down: false,
                next_retry: None,
                backoff: ExponentialBackoff::new(config.backoff()),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hand out a usable connection, reusing an idle one when possible
    ///
    /// The lock is held for the whole attempt, dial included, so attempts on
    /// the same server are serialized. Waiting for the lock ends early when
    /// `cancel` fires.
    pub async fn acquire(self: &Arc<Self>, cancel: &CancellationToken) -> Result<PooledConn<D>> {
        let mut state = tokio::select! {
            biased;
            state = self.state.lock() => state,
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
        };
        let now = self.clock.now();

        let pacing = state.pacing_wait(now, self.min_request_interval);
        if !pacing.is_zero() {
            return Err(self.rate_limited(RateLimitReason::TooFrequent, pacing));
        }
        state.last_acquisition = Some(now);

        if let Some(conn) = state.idle.pop() {
            debug!(address = %self.address, "reusing idle connection");
            return Ok(PooledConn::new(conn, Arc::clone(self)));
        }

        if state.open_count >= self.max_conns {
            return Err(self.rate_limited(
                RateLimitReason::TooManyOpenConnections,
                self.capacity_retry_interval,
            ));
        }

        let backoff = state.down_wait(now);
        if !backoff.is_zero() {
            debug!(address = %self.address, retry_after = ?backoff, "server is down, dial skipped");
            return Err(PoolError::ServerDown {
                address: self.address.clone(),
                cause: DownCause::Backoff {
                    retry_after: backoff,
                },
            });
        }

        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        match self.dial(cancel).await {
            Ok(conn) => {
                state.open_count += 1;
                if state.down {
                    state.down = false;
                    state.next_retry = None;
                    state.backoff.reset();
                    info!(address = %self.address, "server is up again");
                }
                Ok(PooledConn::new(conn, Arc::clone(self)))
            }
            Err(err) => {
                let interval = state.backoff.next_backoff();
                state.down = true;
                state.next_retry = Some(self.clock.now() + interval);
                warn!(
                    address = %self.address,
                    error = %err,
                    retry_after = ?interval,
                    "can't connect to server, marking it down"
                );
                Err(PoolError::ServerDown {
                    address: self.address.clone(),
                    cause: DownCause::Dial(err),
                })
            }
        }
    }

    /// Minimum wait before a later `acquire` might succeed
    ///
    /// Advisory only: down servers report the remaining backoff, paced
    /// servers the rest of the request interval, full servers the capacity
    /// retry interval, anything else zero.
    pub async fn retry_timeout(&self) -> Duration {
        let state = self.state.lock().await;
        let now = self.clock.now();

        let backoff = state.down_wait(now);
        if !backoff.is_zero() {
            return backoff;
        }

        let pacing = state.pacing_wait(now, self.min_request_interval);
        if !pacing.is_zero() {
            return pacing;
        }

        if state.open_count >= self.max_conns && state.idle.is_empty() {
            return self.capacity_retry_interval;
        }

        Duration::ZERO
    }

    pub async fn stats(&self) -> ServerStats {
        let state = self.state.lock().await;
        let now = self.clock.now();
        let retry_after = state
            .down_wait(now)
            .max(state.pacing_wait(now, self.min_request_interval));

        ServerStats {
            address: self.address.clone(),
            open: state.open_count,
            idle: state.idle.len(),
            in_use: state.open_count.saturating_sub(state.idle.len()),
            max_conns: self.max_conns,
            down: state.down,
            retry_after,
        }
    }

    /// Put a still-open connection back into the idle queue
    pub(crate) async fn push_idle(&self, conn: D::Conn) {
        let mut state = self.state.lock().await;
        state.idle.push(conn);
    }

    /// Give back the slot of a connection that is being closed
    pub(crate) async fn release_slot(&self) {
        let mut state = self.state.lock().await;
        debug_assert!(state.open_count > 0, "open connection count underflow");
        state.open_count = state.open_count.saturating_sub(1);
    }

    fn rate_limited(&self, reason: RateLimitReason, retry_after: Duration) -> PoolError {
        debug!(address = %self.address, %reason, ?retry_after, "acquisition ratelimited");
        PoolError::RateLimited {
            address: self.address.clone(),
            reason,
            retry_after,
        }
    }

    /// Dial on a separate task, racing it against the timeout and `cancel`
    ///
    /// The dialer is not trusted to honor cancellation. When the race is lost
    /// the result slot is sealed; a connection that still arrives is closed
    /// by the dial task, one that made it in just in time is kept.
    async fn dial(&self, cancel: &CancellationToken) -> std::result::Result<D::Conn, DialError> {
        let (tx, mut rx) = oneshot::channel();
        let dial_cancel = cancel.child_token();

        let dialer = Arc::clone(&self.dialer);
        let address = self.address.clone();
        let token = dial_cancel.clone();
        tokio::spawn(async move {
            let result = dialer.dial(&address, token).await;
            if let Err(Ok(mut conn)) = tx.send(result) {
                debug!(%address, "closing connection dialed after the attempt was abandoned");
                if let Err(err) = conn.close().await {
                    debug!(%address, error = %err, "can't close abandoned connection");
                }
            }
        });

        let raced = tokio::select! {
            biased;
            result = &mut rx => Some(result),
            _ = cancel.cancelled() => None,
            _ = self.clock.delay(self.connect_timeout) => None,
        };

        let result = match raced {
            Some(result) => result,
            None => {
                dial_cancel.cancel();
                rx.close();
                match rx.try_recv() {
                    Ok(result) => Ok(result),
                    Err(_) => {
                        return Err(DialError::Timeout {
                            address: self.address.clone(),
                            timeout: self.connect_timeout,
                        })
                    }
                }
            }
        };

        match result {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(DialError::Io {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(DialError::Aborted {
                address: self.address.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::conn::ConnState;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct MockConn {
        id: usize,
        close_error: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for MockConn {
        async fn close(&mut self) -> io::Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.close_error {
                Err(io::Error::other("xxx"))
            } else {
                Ok(())
            }
        }
    }

    enum Step {
        Connect,
        ConnectWithCloseError,
        Fail,
        /// Cancel the caller, then connect once it is too late
        CancelThenConnect(CancellationToken),
        /// Never complete
        Hang,
    }

    #[derive(Default)]
    struct MockDialer {
        steps: std::sync::Mutex<VecDeque<Step>>,
        dials: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl MockDialer {
        fn expect(&self, step: Step) {
            self.steps.lock().unwrap().push_back(step);
        }

        fn dials(&self) -> usize {
            self.dials.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        fn conn(&self, id: usize, close_error: bool) -> MockConn {
            MockConn {
                id,
                close_error,
                closed: Arc::clone(&self.closed),
            }
        }
    }

    #[async_trait::async_trait]
    impl Dialer for MockDialer {
        type Conn = MockConn;

        async fn dial(&self, _address: &str, _cancel: CancellationToken) -> io::Result<MockConn> {
            let id = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
            let step = self.steps.lock().unwrap().pop_front();
            match step.expect("unexpected dial") {
                Step::Connect => Ok(self.conn(id, false)),
                Step::ConnectWithCloseError => Ok(self.conn(id, true)),
                Step::Fail => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "xxx")),
                Step::CancelThenConnect(caller) => {
                    caller.cancel();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(self.conn(id, false))
                }
                Step::Hang => std::future::pending().await,
            }
        }
    }

    struct TestServer {
        server: Arc<Server<MockDialer>>,
        dialer: Arc<MockDialer>,
        clock: Arc<ManualClock>,
    }

    impl TestServer {
        fn new(config: PoolConfig) -> Self {
            Self::with_connect_timeout(config, Duration::from_secs(24 * 60 * 60))
        }

        fn with_connect_timeout(config: PoolConfig, connect_timeout: Duration) -> Self {
            let clock = Arc::new(ManualClock::new());
            let dialer = Arc::new(MockDialer::default());
            let config = PoolConfig {
                connect_timeout,
                clock: clock.clone(),
                ..config
            }
            .with_defaults();

            Self {
                server: Arc::new(Server::new("addr", &config, Arc::clone(&dialer))),
                dialer,
                clock,
            }
        }

        fn unlimited() -> Self {
            Self::new(PoolConfig {
                max_rps: u32::MAX,
                max_conns_per_server: usize::MAX,
                ..Default::default()
            })
        }

        async fn acquire(&self) -> Result<PooledConn<MockDialer>> {
            self.server.acquire(&CancellationToken::new()).await
        }

        /// Acquire a second later, clear of any pacing
        async fn acquire_later(&self) -> PooledConn<MockDialer> {
            self.clock.advance(Duration::from_secs(1));
            self.acquire().await.expect("acquire should succeed")
        }
    }

    fn conn_id(conn: &PooledConn<MockDialer>) -> usize {
        conn.original_conn().expect("active connection").id
    }

    #[tokio::test]
    async fn test_ratelimits() {
        let ts = TestServer::new(PoolConfig {
            max_rps: 10,
            max_conns_per_server: 10,
            ..Default::default()
        });
        for _ in 0..3 {
            ts.dialer.expect(Step::Connect);
        }

        // First attempt is never paced
        let _first = ts.acquire().await.unwrap();

        ts.clock.advance(Duration::from_secs(1));
        let _second = ts.acquire().await.unwrap();

        let err = ts.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::RateLimited {
                reason: RateLimitReason::TooFrequent,
                ..
            }
        ));
        assert_eq!(ts.server.retry_timeout().await, Duration::from_millis(100));

        ts.clock.advance(Duration::from_millis(1));
        assert!(matches!(ts.acquire().await, Err(PoolError::RateLimited { .. })));

        ts.clock.advance(Duration::from_millis(98));
        assert!(matches!(ts.acquire().await, Err(PoolError::RateLimited { .. })));
        assert_eq!(ts.server.retry_timeout().await, Duration::from_millis(1));

        ts.clock.advance(Duration::from_millis(2));
        let _third = ts.acquire().await.unwrap();
        assert_eq!(ts.dialer.dials(), 3);
    }

    #[tokio::test]
    async fn test_too_many_conns() {
        let ts = TestServer::new(PoolConfig {
            max_rps: u32::MAX,
            max_conns_per_server: 3,
            ..Default::default()
        });
        for _ in 0..3 {
            ts.dialer.expect(Step::Connect);
        }

        let mut first = ts.acquire_later().await;
        let _second = ts.acquire_later().await;
        let _third = ts.acquire_later().await;

        ts.clock.advance(Duration::from_secs(1));
        let err = ts.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::RateLimited {
                reason: RateLimitReason::TooManyOpenConnections,
                ..
            }
        ));
        assert_eq!(ts.server.retry_timeout().await, Duration::from_millis(100));

        // Returning one makes it available again without a new dial
        first.return_to_pool().await.unwrap();
        assert_eq!(ts.server.retry_timeout().await, Duration::ZERO);
        let reused = ts.acquire_later().await;
        assert_eq!(conn_id(&reused), 1);
        assert_eq!(ts.dialer.dials(), 3);
    }

    #[tokio::test]
    async fn test_idle_conns_are_reused_in_fifo_order() {
        let ts = TestServer::unlimited();
        ts.dialer.expect(Step::Connect);
        ts.dialer.expect(Step::Connect);

        let mut a = ts.acquire_later().await;
        let mut b = ts.acquire_later().await;
        let (id_a, id_b) = (conn_id(&a), conn_id(&b));
        assert_ne!(id_a, id_b);

        a.return_to_pool().await.unwrap();
        b.return_to_pool().await.unwrap();

        let mut first = ts.acquire_later().await;
        let second = ts.acquire_later().await;
        assert_eq!(conn_id(&first), id_a);
        assert_eq!(conn_id(&second), id_b);

        first.return_to_pool().await.unwrap();
        let again = ts.acquire_later().await;
        assert_eq!(conn_id(&again), id_a);

        assert_eq!(ts.dialer.dials(), 2);
        assert_eq!(ts.dialer.closed(), 0);

        let stats = ts.server.stats().await;
        assert_eq!(stats.open, 2);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.in_use, 2);
    }

    #[tokio::test]
    async fn test_broken_connection_frees_its_slot() {
        let ts = TestServer::new(PoolConfig {
            max_rps: u32::MAX,
            max_conns_per_server: 3,
            ..Default::default()
        });
        ts.dialer.expect(Step::ConnectWithCloseError);

        let mut conn = ts.acquire_later().await;
        conn.return_to_pool().await.unwrap();

        // Reused, then closed: the close error surfaces, the slot is freed
        let mut conn = ts.acquire_later().await;
        let err = conn.close().await.unwrap_err();
        assert!(matches!(err, PoolError::Close { .. }));
        assert_eq!(ts.dialer.closed(), 1);

        for _ in 0..3 {
            ts.dialer.expect(Step::Connect);
        }
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(ts.acquire_later().await);
        }

        ts.clock.advance(Duration::from_secs(1));
        assert!(matches!(ts.acquire().await, Err(PoolError::RateLimited { .. })));
        assert_eq!(ts.dialer.dials(), 4);
    }

    #[tokio::test]
    async fn test_mark_broken_closes_instead_of_returning() {
        let ts = TestServer::unlimited();
        ts.dialer.expect(Step::Connect);
        ts.dialer.expect(Step::Connect);

        let mut conn = ts.acquire_later().await;
        conn.mark_broken();
        assert!(conn.is_broken());
        conn.return_to_pool().await.unwrap();
        assert_eq!(conn.state(), ConnState::Closed);
        assert_eq!(ts.dialer.closed(), 1);

        let stats = ts.server.stats().await;
        assert_eq!(stats.open, 0);
        assert_eq!(stats.idle, 0);

        // Nothing idle, so the next acquisition dials again
        let fresh = ts.acquire_later().await;
        assert_eq!(conn_id(&fresh), 2);
    }

    #[tokio::test]
    async fn test_server_is_down() {
        // Zero randomization: 1m, 1m30s, 2m15s, 3m22.5s, 5m, 5m, ...
        let ts = TestServer::new(PoolConfig {
            max_rps: u32::MAX,
            max_conns_per_server: usize::MAX,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
            backoff_randomization: 0.0,
            ..Default::default()
        });

        ts.dialer.expect(Step::Fail);
        let err = ts.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::ServerDown {
                cause: DownCause::Dial(DialError::Io { .. }),
                ..
            }
        ));

        // 30s elapsed, next retry at 1m: no dial
        ts.clock.advance(Duration::from_secs(30));
        let err = ts.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::ServerDown {
                cause: DownCause::Backoff { .. },
                ..
            }
        ));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(ts.server.retry_timeout().await, Duration::from_secs(30));

        // 1m1s elapsed
        ts.clock.advance(Duration::from_secs(31));
        assert_eq!(ts.server.retry_timeout().await, Duration::ZERO);

        // The caller gives up while the dial is in flight: timeout, next retry at 2m31s
        let caller = CancellationToken::new();
        ts.dialer.expect(Step::CancelThenConnect(caller.clone()));
        let err = ts.server.acquire(&caller).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::ServerDown {
                cause: DownCause::Dial(DialError::Timeout { .. }),
                ..
            }
        ));

        // The late connection is closed rather than leaked
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ts.dialer.closed(), 1);
        assert_eq!(ts.server.stats().await.open, 0);

        // 2m1s elapsed: still backing off
        ts.clock.advance(Duration::from_secs(60));
        let err = ts.acquire().await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

        // 2m32s elapsed: dial succeeds and the server is up again
        ts.dialer.expect(Step::Connect);
        ts.clock.advance(Duration::from_secs(31));
        let conn = ts.acquire().await.unwrap();
        assert_eq!(conn_id(&conn), 3);
        assert!(!ts.server.stats().await.down);

        // A new failure episode starts from the initial interval again
        ts.clock.advance(Duration::from_micros(1));
        ts.dialer.expect(Step::Fail);
        assert!(matches!(ts.acquire().await, Err(PoolError::ServerDown { .. })));
        assert_eq!(ts.server.retry_timeout().await, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cancelled_before_dial() {
        let ts = TestServer::unlimited();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ts.server.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert_eq!(ts.dialer.dials(), 0);
        assert!(!ts.server.stats().await.down);
    }

    #[tokio::test]
    async fn test_connection_double_close() {
        let ts = TestServer::unlimited();
        ts.dialer.expect(Step::Connect);
        ts.dialer.expect(Step::Connect);

        let mut cn1 = ts.acquire_later().await;
        cn1.close().await.unwrap();
        assert!(matches!(
            cn1.return_to_pool().await,
            Err(PoolError::AlreadyReleased(ConnState::Closed))
        ));
        assert!(matches!(
            cn1.close().await,
            Err(PoolError::AlreadyReleased(ConnState::Closed))
        ));
        assert_eq!(ts.dialer.closed(), 1);

        let mut cn2 = ts.acquire_later().await;
        cn2.return_to_pool().await.unwrap();
        assert!(matches!(
            cn2.close().await,
            Err(PoolError::AlreadyReleased(ConnState::Returned))
        ));
        assert!(matches!(
            cn2.return_to_pool().await,
            Err(PoolError::AlreadyReleased(ConnState::Returned))
        ));

        let stats = ts.server.stats().await;
        assert_eq!(stats.open, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(ts.dialer.closed(), 1);
    }

    fn spawn_acquire(
        server: &Arc<Server<MockDialer>>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<PooledConn<MockDialer>>> {
        let server = Arc::clone(server);
        let cancel = cancel.clone();
        tokio::spawn(async move { server.acquire(&cancel).await })
    }

    async fn wait_for_dials(dialer: &MockDialer, count: usize) {
        while dialer.dials() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_dial_bounded_by_connect_timeout() {
        let ts = TestServer::with_connect_timeout(
            PoolConfig {
                max_rps: u32::MAX,
                max_conns_per_server: usize::MAX,
                initial_backoff: Duration::from_secs(60),
                max_backoff: Duration::from_secs(300),
                backoff_randomization: 0.0,
                ..Default::default()
            },
            Duration::from_secs(2),
        );
        ts.dialer.expect(Step::Hang);

        let attempt = spawn_acquire(&ts.server, &CancellationToken::new());
        wait_for_dials(&ts.dialer, 1).await;
        ts.clock.advance(Duration::from_secs(3));

        let err = tokio::time::timeout(Duration::from_secs(5), attempt)
            .await
            .expect("dial should give up at the connect timeout")
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::ServerDown {
                cause: DownCause::Dial(DialError::Timeout { timeout, .. }),
                ..
            } if timeout == Duration::from_secs(2)
        ));

        let stats = ts.server.stats().await;
        assert!(stats.down);
        assert_eq!(stats.open, 0);
        assert_eq!(ts.server.retry_timeout().await, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_lock() {
        let ts = TestServer::unlimited();
        ts.dialer.expect(Step::Hang);

        // The first attempt holds the server lock while its dial hangs
        let holder = CancellationToken::new();
        let first = spawn_acquire(&ts.server, &holder);
        wait_for_dials(&ts.dialer, 1).await;

        let waiter = CancellationToken::new();
        let second = spawn_acquire(&ts.server, &waiter);
        tokio::task::yield_now().await;
        waiter.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("cancelled attempt should not wait for the lock")
            .unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));

        holder.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .expect("cancelled dial should end")
            .unwrap();
        assert!(matches!(
            result,
            Err(PoolError::ServerDown {
                cause: DownCause::Dial(DialError::Timeout { .. }),
                ..
            })
        ));
        assert_eq!(ts.dialer.dials(), 1);
    }

    #[tokio::test]
    async fn test_invalid_backoff_settings_do_not_break_dial_failures() {
        for (multiplier, randomization) in [(f64::NAN, 0.0), (1.5, f64::NAN), (1.5, 1e300)] {
            let ts = TestServer::new(PoolConfig {
                max_rps: u32::MAX,
                initial_backoff: Duration::from_secs(60),
                max_backoff: Duration::from_secs(300),
                backoff_multiplier: multiplier,
                backoff_randomization: randomization,
                ..Default::default()
            });
            ts.dialer.expect(Step::Fail);
            ts.dialer.expect(Step::Fail);

            assert!(matches!(ts.acquire().await, Err(PoolError::ServerDown { .. })));
            let wait = ts.server.retry_timeout().await;
            assert!(wait >= Duration::from_secs(30) && wait <= Duration::from_secs(90));

            ts.clock.advance(Duration::from_secs(120));
            assert!(matches!(ts.acquire().await, Err(PoolError::ServerDown { .. })));
            assert!(ts.server.retry_timeout().await <= Duration::from_secs(300));
        }
    }
}
