//! Page readiness: when is a page done enough to take a screenshot?
//!
//! There is no reliable signal for "client-side rendering finished", so the
//! policy is a best-effort sequence of bounded waits executed in order.

use crate::{CaptureOptions, Error, ReadyState, Renderer, Result};
use log::debug;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One bounded wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Wait until no new network resource was requested for `quiet`,
    /// giving up after `timeout` if one is set
    NetworkIdle { quiet: Duration, timeout: Option<Duration> },
    /// Sleep unconditionally
    Settle(Duration),
    /// Poll `document.readyState` until it is `complete`
    DocumentComplete { timeout: Duration, poll: Duration },
}

/// Ordered list of wait strategies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessPolicy {
    steps: Vec<WaitStrategy>,
}

impl ReadinessPolicy {
    /// A policy that does not wait at all
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: WaitStrategy) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[WaitStrategy] {
        &self.steps
    }

    /// Network idle (bounded by the navigation timeout), then the settle
    /// delay, then the ready-state poll.
    pub fn for_capture(options: &CaptureOptions) -> Self {
        let mut policy = Self::new().then(WaitStrategy::NetworkIdle {
            quiet: Duration::from_millis(options.network_idle_ms),
            timeout: options.timeout(),
        });
        if options.wait_after_load_ms > 0 {
            policy = policy.then(WaitStrategy::Settle(Duration::from_millis(options.wait_after_load_ms)));
        }
        policy.then(WaitStrategy::DocumentComplete {
            timeout: Duration::from_millis(options.ready_timeout_ms),
            poll: POLL_INTERVAL,
        })
    }

    /// Execute every step in order; the first failing step aborts.
    pub fn run<R: Renderer + ?Sized>(&self, page: &mut R) -> Result<()> {
        for step in &self.steps {
            debug!("readiness: {:?}", step);
            match *step {
                WaitStrategy::NetworkIdle { quiet, timeout } => wait_network_idle(page, quiet, timeout)?,
                WaitStrategy::Settle(delay) => std::thread::sleep(delay),
                WaitStrategy::DocumentComplete { timeout, poll } => wait_document_complete(page, timeout, poll)?,
            }
        }
        Ok(())
    }
}

fn wait_network_idle<R: Renderer + ?Sized>(page: &mut R, quiet: Duration, timeout: Option<Duration>) -> Result<()> {
    let started = Instant::now();
    let mut last_count = page.resource_count()?;
    let mut last_change = started;
    let poll = POLL_INTERVAL.min(quiet.max(Duration::from_millis(1)));

    loop {
        if last_change.elapsed() >= quiet {
            return Ok(());
        }
        if let Some(timeout) = timeout.filter(|t| started.elapsed() >= *t) {
            return Err(Error::CaptureTimeoutError(timeout.as_millis() as u64));
        }
        std::thread::sleep(poll);
        let count = page.resource_count()?;
        if count != last_count {
            last_count = count;
            last_change = Instant::now();
        }
    }
}

fn wait_document_complete<R: Renderer + ?Sized>(page: &mut R, timeout: Duration, poll: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        if page.ready_state()? == ReadyState::Complete {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(Error::CaptureTimeoutError(timeout.as_millis() as u64));
        }
        std::thread::sleep(poll);
    }
}
