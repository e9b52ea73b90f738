//! Eased servo motion
//!
//! A move from one angle to another is split into steps of at most
//! `step_degrees`. Angles advance linearly with the step index; the pause
//! after each step is weighted by `0.5 - 0.5·cos(π·p)` so the motion has a
//! soft start and stop without uneven angle jumps.

use std::f64::consts::PI;
use std::time::Duration;

use crate::Result;
use crate::hardware::{ServoDriver, clamp_angle};

/// One intermediate position of a move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionStep {
    /// Angle to command
    pub angle: f64,
    /// Pause after commanding it
    pub delay: Duration,
}

/// A single eased move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    from: f64,
    to: f64,
    duration: Duration,
    step_degrees: f64,
}

impl MotionProfile {
    /// Describe a move; angles are clamped to the servo range
    #[must_use]
    pub fn new(from: f64, to: f64, duration: Duration, step_degrees: f64) -> Self {
        Self {
            from: clamp_angle(from),
            to: clamp_angle(to),
            duration,
            step_degrees: step_degrees.max(f64::EPSILON),
        }
    }

    /// Number of steps in the move, zero when already at the target
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn step_count(&self) -> usize {
        ((self.to - self.from).abs() / self.step_degrees).ceil() as usize
    }

    /// Lazily generate the steps; every call starts from the beginning
    #[must_use]
    pub fn steps(&self) -> MotionSteps {
        MotionSteps {
            profile: *self,
            index: 0,
            count: self.step_count(),
        }
    }
}

/// Iterator over the steps of a [`MotionProfile`]
#[derive(Debug, Clone)]
pub struct MotionSteps {
    profile: MotionProfile,
    index: usize,
    count: usize,
}

impl Iterator for MotionSteps {
    type Item = MotionStep;

    #[allow(clippy::cast_precision_loss)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        self.index += 1;

        let MotionProfile { from, to, duration, .. } = self.profile;
        let progress = self.index as f64 / self.count as f64;
        let angle = if self.index == self.count {
            to
        } else {
            (to - from).mul_add(progress, from)
        };
        let delay = duration.div_f64(self.count as f64).mul_f64(ease_weight(progress));

        Some(MotionStep { angle, delay })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MotionSteps {}

/// Ease-in-out weight for progress `p` in `0..=1`
#[must_use]
pub fn ease_weight(progress: f64) -> f64 {
    0.5f64.mul_add(-(PI * progress.clamp(0.0, 1.0)).cos(), 0.5)
}

/// Drive `channel` to `target` over `duration`
///
/// Starts from the last commanded angle; a channel that was never commanded
/// is treated as already at the target.
///
/// # Errors
///
/// Returns `Error::Bus` if a write fails; the move stops at that step
pub async fn ease_to(
    driver: &ServoDriver,
    channel: u8,
    target: f64,
    duration: Duration,
    step_degrees: f64,
) -> Result<()> {
    let from = driver.angle(channel).unwrap_or_else(|| clamp_angle(target));
    let profile = MotionProfile::new(from, target, duration, step_degrees);

    tracing::trace!(channel, from, target, steps = profile.step_count(), "easing servo");

    for step in profile.steps() {
        driver.set_angle_instant(channel, step.angle)?;
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
    }
    Ok(())
}
