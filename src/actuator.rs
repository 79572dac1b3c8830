//! Motor control and the speaking animation
//!
//! Actuators are addressed by [`ActuatorId`] through the [`ActuatorBus`]
//! trait. Every operation is idempotent so cleanup paths can call them
//! freely. Pin wiring lives outside this crate; [`LogActuators`] records
//! state changes through `tracing` only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// A motor output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorId {
    /// Opens the mouth while on
    Mouth,
    /// Drives the tail forward
    Tail,
    /// Drives the tail backward
    TailReverse,
}

impl ActuatorId {
    /// Every actuator
    pub const ALL: [Self; 3] = [Self::Mouth, Self::Tail, Self::TailReverse];
}

/// How the mouth moves while speaking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouthMode {
    /// Random open and close timings
    #[default]
    Random,
    /// Follow the loudness of the audio being played
    Amplitude,
}

/// Output-side control of the animatronic's motors
pub trait ActuatorBus: Send + Sync {
    /// Switch one actuator on or off
    ///
    /// # Errors
    ///
    /// Returns `Actuator` if the output cannot be driven
    fn set_state(&self, id: ActuatorId, on: bool) -> Result<()>;

    /// Drive one actuator at `percent` duty cycle
    ///
    /// Outputs without speed control are on for any non-zero duty.
    ///
    /// # Errors
    ///
    /// Returns `Actuator` if the output cannot be driven
    fn set_duty_cycle(&self, id: ActuatorId, percent: u8) -> Result<()> {
        self.set_state(id, percent > 0)
    }

    /// Switch every actuator off
    ///
    /// # Errors
    ///
    /// Returns `Actuator` if any output cannot be driven
    fn reset(&self) -> Result<()> {
        for id in ActuatorId::ALL {
            self.set_state(id, false)?;
        }
        Ok(())
    }
}

/// Actuators that only log state changes
#[derive(Debug, Default)]
pub struct LogActuators {
    states: Mutex<HashMap<ActuatorId, bool>>,
}

impl LogActuators {
    /// Create with every actuator off
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActuatorBus for LogActuators {
    fn set_state(&self, id: ActuatorId, on: bool) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| Error::Actuator("state table poisoned".to_string()))?;

        let previous = states.insert(id, on).unwrap_or(false);
        if previous != on {
            tracing::trace!(actuator = ?id, on, "actuator changed");
        }
        Ok(())
    }
}

/// Resets every actuator when dropped
pub struct ActuatorGuard {
    bus: Arc<dyn ActuatorBus>,
}

impl ActuatorGuard {
    /// Guard `bus`
    #[must_use]
    pub fn new(bus: Arc<dyn ActuatorBus>) -> Self {
        Self { bus }
    }
}

impl Drop for ActuatorGuard {
    fn drop(&mut self) {
        if let Err(e) = self.bus.reset() {
            tracing::warn!(error = %e, "failed to reset actuators");
        }
    }
}

/// Set an actuator, logging instead of failing
pub fn drive(bus: &dyn ActuatorBus, id: ActuatorId, on: bool) {
    if let Err(e) = bus.set_state(id, on) {
        tracing::warn!(actuator = ?id, on, error = %e, "actuator write failed");
    }
}

fn drive_tail(bus: &dyn ActuatorBus, forward: bool) {
    drive(bus, ActuatorId::Tail, forward);
    drive(bus, ActuatorId::TailReverse, !forward);
}

/// Animate the mouth and tail until `cancel` fires
///
/// The tail changes direction every `tail_swap_interval`. In
/// [`MouthMode::Random`] the mouth flaps with random timings; in
/// [`MouthMode::Amplitude`] the mouth is left to the playback loop.
pub async fn animate(
    bus: Arc<dyn ActuatorBus>,
    mode: MouthMode,
    tail_swap_interval: Duration,
    cancel: CancellationToken,
) {
    let mut rng = StdRng::from_entropy();
    let mut forward = true;
    let mut next_swap = Instant::now() + tail_swap_interval;

    tracing::debug!(?mode, "animation started");
    drive_tail(bus.as_ref(), forward);

    loop {
        if Instant::now() >= next_swap {
            forward = !forward;
            drive_tail(bus.as_ref(), forward);
            next_swap += tail_swap_interval;
        }

        let step = async {
            match mode {
                MouthMode::Random => {
                    drive(bus.as_ref(), ActuatorId::Mouth, true);
                    tokio::time::sleep(Duration::from_millis(rng.gen_range(30..=80))).await;
                    drive(bus.as_ref(), ActuatorId::Mouth, false);
                    tokio::time::sleep(Duration::from_millis(rng.gen_range(30..=100))).await;
                }
                MouthMode::Amplitude => tokio::time::sleep_until(next_swap).await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = step => {}
        }
    }

    drive(bus.as_ref(), ActuatorId::Mouth, false);
    drive(bus.as_ref(), ActuatorId::Tail, false);
    drive(bus.as_ref(), ActuatorId::TailReverse, false);
    tracing::debug!("animation stopped");
}

/// Flap the mouth, then wag the tail, one second each
///
/// Every actuator is off when this returns, whether or not it succeeded.
///
/// # Errors
///
/// Returns `Actuator` if an output cannot be driven
pub async fn exercise(bus: Arc<dyn ActuatorBus>) -> Result<()> {
    let _guard = ActuatorGuard::new(Arc::clone(&bus));
    let step = Duration::from_millis(100);

    tracing::info!("testing mouth");
    for _ in 0..5 {
        bus.set_state(ActuatorId::Mouth, true)?;
        tokio::time::sleep(step).await;
        bus.set_state(ActuatorId::Mouth, false)?;
        tokio::time::sleep(step).await;
    }

    tracing::info!("testing tail");
    for forward in [true, false] {
        bus.set_duty_cycle(ActuatorId::Tail, if forward { 100 } else { 0 })?;
        bus.set_duty_cycle(ActuatorId::TailReverse, if forward { 0 } else { 100 })?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    bus.reset()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ActuatorId, bool)>>,
        fail_at: Option<usize>,
    }

    impl Recorder {
        fn events(&self) -> Vec<(ActuatorId, bool)> {
            self.events.lock().unwrap().clone()
        }

        fn last(&self, id: ActuatorId) -> Option<bool> {
            self.events()
                .into_iter()
                .rev()
                .find(|(i, _)| *i == id)
                .map(|(_, on)| on)
        }
    }

    impl ActuatorBus for Recorder {
        fn set_state(&self, id: ActuatorId, on: bool) -> Result<()> {
            let mut events = self.events.lock().unwrap();
            if self.fail_at == Some(events.len()) {
                // counted, so only this one write fails
                events.push((id, on));
                return Err(Error::Actuator("pin write failed".to_string()));
            }
            events.push((id, on));
            Ok(())
        }
    }

    #[test]
    fn test_duty_cycle_defaults_to_on_off() {
        let bus = Recorder::default();
        bus.set_duty_cycle(ActuatorId::Tail, 40).unwrap();
        bus.set_duty_cycle(ActuatorId::Tail, 0).unwrap();
        assert_eq!(
            bus.events(),
            vec![(ActuatorId::Tail, true), (ActuatorId::Tail, false)]
        );
    }

    #[test]
    fn test_guard_resets_on_drop() {
        let bus = Arc::new(Recorder::default());
        bus.set_state(ActuatorId::Mouth, true).unwrap();
        {
            let _guard = ActuatorGuard::new(bus.clone());
        }
        for id in ActuatorId::ALL {
            assert_eq!(bus.last(id), Some(false));
        }
    }

    #[test]
    fn test_log_actuators_idempotent() {
        let bus = LogActuators::new();
        bus.set_state(ActuatorId::Mouth, true).unwrap();
        bus.set_state(ActuatorId::Mouth, true).unwrap();
        bus.reset().unwrap();
        bus.reset().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_animation_flaps_and_swaps() {
        let bus = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(animate(
            bus.clone(),
            MouthMode::Random,
            Duration::from_millis(500),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        cancel.cancel();
        handle.await.unwrap();

        let events = bus.events();
        let opens = events
            .iter()
            .filter(|e| **e == (ActuatorId::Mouth, true))
            .count();
        assert!(opens >= 5);
        assert!(events.contains(&(ActuatorId::TailReverse, true)));
        assert_eq!(bus.last(ActuatorId::Mouth), Some(false));
        assert_eq!(bus.last(ActuatorId::Tail), Some(false));
        assert_eq!(bus.last(ActuatorId::TailReverse), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_amplitude_animation_leaves_mouth_alone() {
        let bus = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(animate(
            bus.clone(),
            MouthMode::Amplitude,
            Duration::from_millis(200),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(700)).await;
        cancel.cancel();
        handle.await.unwrap();

        let events = bus.events();
        assert!(!events.contains(&(ActuatorId::Mouth, true)));
        let swaps = events
            .iter()
            .filter(|e| **e == (ActuatorId::TailReverse, true))
            .count();
        assert!(swaps >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exercise_ends_with_everything_off() {
        let bus = Arc::new(Recorder::default());
        exercise(bus.clone()).await.unwrap();
        for id in ActuatorId::ALL {
            assert_eq!(bus.last(id), Some(false));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exercise_failure_leaves_nothing_on() {
        // fails while the tail is being driven forward
        let bus = Arc::new(Recorder {
            fail_at: Some(11),
            ..Recorder::default()
        });

        let result = exercise(bus.clone()).await;

        assert!(matches!(result, Err(Error::Actuator(_))));
        assert!(bus.events().contains(&(ActuatorId::Tail, true)));
        for id in ActuatorId::ALL {
            assert_eq!(bus.last(id), Some(false));
        }
    }
}
