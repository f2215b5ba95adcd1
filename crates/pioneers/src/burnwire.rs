//! Burn-wire actuation.
//!
//! The burn-wire is the only actuator the supervisor drives. It is asserted
//! for a bounded time and forced low whenever anything unusual happens; the
//! owning [`BurnWire`] also forces it low when dropped.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::gpio::{GpioError, InputPin, OutputPin};

/// Default hard limit on how long the wire may stay asserted.
pub const DEFAULT_BURN_DURATION: Duration = Duration::from_millis(10_000);

/// Decides whether a burn can end before the hard timeout.
pub trait BurnCompletion {
    /// Called on every poll while burning. `elapsed` is time since the burn
    /// started.
    fn is_complete(&mut self, elapsed: Duration) -> bool;
}

impl<B: BurnCompletion + ?Sized> BurnCompletion for Box<B> {
    fn is_complete(&mut self, elapsed: Duration) -> bool {
        (**self).is_complete(elapsed)
    }
}

/// Burn for the full duration; only the timeout ends it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutOnly;

impl BurnCompletion for TimeoutOnly {
    fn is_complete(&mut self, _elapsed: Duration) -> bool {
        false
    }
}

/// Ends the burn when a feedback input (e.g. a release switch) reads high.
///
/// A read error is treated as "not complete"; the hard timeout still applies.
#[derive(Debug)]
pub struct FeedbackInput<P> {
    pin: P,
}

impl<P: InputPin> FeedbackInput<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin> BurnCompletion for FeedbackInput<P> {
    fn is_complete(&mut self, _elapsed: Duration) -> bool {
        match self.pin.read() {
            Ok(high) => high,
            Err(err) => {
                warn!(error = %err, "burn feedback read failed");
                false
            }
        }
    }
}

/// Why a burn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnOutcome {
    /// The hard timeout elapsed.
    TimedOut,
    /// The completion policy reported success first.
    Completed,
}

/// Owner of the burn-wire output.
pub struct BurnWire {
    pin: Box<dyn OutputPin>,
    completion: Box<dyn BurnCompletion>,
    duration: Duration,
    started: Option<Duration>,
}

impl std::fmt::Debug for BurnWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurnWire")
            .field("asserted", &self.pin.level())
            .field("duration", &self.duration)
            .field("started", &self.started)
            .finish()
    }
}

impl BurnWire {
    /// Take ownership of `pin` and drive it low.
    pub fn new(pin: Box<dyn OutputPin>, duration: Duration) -> Self {
        let mut wire = Self {
            pin,
            completion: Box::new(TimeoutOnly),
            duration,
            started: None,
        };
        wire.force_low();
        wire
    }

    pub fn with_completion(mut self, completion: Box<dyn BurnCompletion>) -> Self {
        self.set_completion(completion);
        self
    }

    pub fn set_completion(&mut self, completion: Box<dyn BurnCompletion>) {
        self.completion = completion;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Electrical level last driven onto the wire.
    pub fn is_asserted(&self) -> bool {
        self.pin.level()
    }

    pub fn is_burning(&self) -> bool {
        self.started.is_some()
    }

    /// Clock time the current burn started at.
    pub fn started(&self) -> Option<Duration> {
        self.started
    }

    /// Assert the wire at `now`. A burn already in progress keeps its
    /// original start time.
    pub fn fire(&mut self, now: Duration) -> Result<(), GpioError> {
        if self.started.is_some() {
            return Ok(());
        }
        if let Err(err) = self.pin.write(true) {
            self.force_low();
            return Err(err);
        }
        self.started = Some(now);
        info!(duration_ms = self.duration.as_millis() as u64, "burn-wire asserted");
        Ok(())
    }

    /// End the burn once it has timed out or the completion policy says so.
    pub fn poll(&mut self, now: Duration) -> Option<BurnOutcome> {
        let started = self.started?;
        let elapsed = now.saturating_sub(started);
        let outcome = if elapsed >= self.duration {
            BurnOutcome::TimedOut
        } else if self.completion.is_complete(elapsed) {
            BurnOutcome::Completed
        } else {
            return None;
        };
        self.force_low();
        info!(elapsed_ms = elapsed.as_millis() as u64, outcome = ?outcome, "burn-wire deasserted");
        Some(outcome)
    }

    /// Drive the wire low and forget any burn in progress.
    ///
    /// Always writes, even when the wire is believed low.
    pub fn force_low(&mut self) {
        self.started = None;
        if let Err(err) = self.pin.write(false) {
            error!(fatal = true, error = %err, "failed to drive burn-wire low");
        }
    }
}

impl Drop for BurnWire {
    fn drop(&mut self) {
        self.force_low();
    }
}
