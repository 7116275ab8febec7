//! Circuit breaker.
//!
//! Closed: calls pass through and consecutive infrastructure failures are
//! counted. Once the count exceeds the threshold the breaker opens and
//! fails fast for the open timeout. Then it lets a limited number of probe
//! calls through (half-open): a successful probe closes it again, a failed
//! one reopens it.
//!
//! Business outcomes count as successes: the dependency answered.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::classify::{Classify, ClientKind};
use crate::error::BreakerError;

/// Breaker state as seen by the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Resource name, used in errors and logs.
    pub name: String,
    pub client: ClientKind,
    /// The breaker opens once consecutive failures exceed this.
    pub max_consecutive_failures: u32,
    /// Baseline time spent open.
    pub open_timeout: Duration,
    /// Upper bound of the random delay added to `open_timeout`, drawn once
    /// per breaker so replicas do not probe in lockstep.
    pub jitter: Duration,
    /// Calls admitted while half-open; as many successes close the breaker.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            client: ClientKind::Http,
            max_consecutive_failures: 3,
            open_timeout: Duration::from_secs(30),
            jitter: Duration::from_secs(10),
            half_open_max_calls: 1,
        }
    }
}

impl BreakerConfig {
    pub fn new(name: impl Into<String>, client: ClientKind) -> Self {
        Self {
            name: name.into(),
            client,
            ..Self::default()
        }
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = failures;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Bumped on every transition; results of calls admitted under an older
    /// value are ignored.
    generation: u64,
    consecutive_failures: u32,
    half_open_requests: u32,
    half_open_successes: u32,
    open_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    probe: bool,
}

/// Circuit breaker guarding one named resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker. The jitter is drawn here, once.
    pub fn new(config: BreakerConfig) -> Self {
        let timeout = config.open_timeout + random_jitter(config.jitter);
        debug!(breaker = %config.name, client = %config.client, ?timeout, "Created circuit breaker");

        Self {
            config,
            timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                consecutive_failures: 0,
                half_open_requests: 0,
                half_open_successes: 0,
                open_until: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Time spent open before probing, jitter included.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Runs `op` unless the breaker refuses it.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let ticket = self.admit().map_err(|rejection| match rejection {
            Rejection::Open => BreakerError::Open(self.config.name.clone()),
            Rejection::TooManyRequests => BreakerError::TooManyRequests(self.config.name.clone()),
        })?;

        let guard = ProbeGuard {
            breaker: self,
            ticket,
            armed: true,
        };
        let result = op().await;

        let success = match &result {
            Ok(_) => true,
            Err(err) => self.config.client.is_business(err),
        };
        guard.settle(success);

        result.map_err(BreakerError::Inner)
    }

    fn admit(&self) -> Result<Ticket, Rejection> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            BreakerState::Closed => Ok(Ticket {
                generation: inner.generation,
                probe: false,
            }),
            BreakerState::Open => Err(Rejection::Open),
            BreakerState::HalfOpen => {
                if inner.half_open_requests >= self.config.half_open_max_calls {
                    return Err(Rejection::TooManyRequests);
                }
                inner.half_open_requests += 1;
                Ok(Ticket {
                    generation: inner.generation,
                    probe: true,
                })
            }
        }
    }

    fn record(&self, ticket: Ticket, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if inner.generation != ticket.generation {
            return;
        }

        match (inner.state, success) {
            (BreakerState::Closed, true) => inner.consecutive_failures = 0,
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures > self.config.max_consecutive_failures {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.transition(&mut inner, BreakerState::Open, now);
            }
            (BreakerState::Open, _) => {}
        }
    }

    fn release_probe(&self, ticket: Ticket) {
        let mut inner = self.inner.lock();
        if inner.generation == ticket.generation && inner.state == BreakerState::HalfOpen {
            inner.half_open_requests = inner.half_open_requests.saturating_sub(1);
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open && inner.open_until.is_some_and(|until| until <= now) {
            self.transition(inner, BreakerState::HalfOpen, now);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        inner.half_open_requests = 0;
        inner.half_open_successes = 0;
        inner.open_until = (to == BreakerState::Open).then(|| now + self.timeout);

        info!(breaker = %self.config.name, %from, %to, "Circuit breaker state changed");
    }
}

enum Rejection {
    Open,
    TooManyRequests,
}

/// Frees a half-open slot if the call is dropped before it settles.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn settle(mut self, success: bool) {
        self.armed = false;
        self.breaker.record(self.ticket, success);
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.ticket.probe {
            self.breaker.release_probe(self.ticket);
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_millis))
}
