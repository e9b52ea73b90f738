//! Eye gestures and the idle animation loop
//!
//! The animation loop and the foreground gestures write the same channels, so
//! every gesture stops the loop (and waits for it to exit) before moving.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::EyeConfig;
use crate::hardware::ServoDriver;
use crate::motion::ease_to;

/// Owner of the eye servos
pub struct Eyes {
    driver: Arc<ServoDriver>,
    config: Arc<EyeConfig>,
    animation: Option<Animation>,
}

/// Handle of a running idle loop
struct Animation {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl Eyes {
    /// Create the eye controller; the animation loop is not started
    #[must_use]
    pub fn new(driver: Arc<ServoDriver>, config: EyeConfig) -> Self {
        Self {
            driver,
            config: Arc::new(config),
            animation: None,
        }
    }

    /// The underlying actuator driver
    #[must_use]
    pub const fn driver(&self) -> &Arc<ServoDriver> {
        &self.driver
    }

    /// Snap every channel to the resting pose: centred gaze, lids closed
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if a write fails
    pub async fn rest(&mut self) -> Result<()> {
        self.stop_animation().await?;
        let c = &self.config;
        self.driver.set_angle_instant(c.horizontal.channel, c.horizontal.center)?;
        self.driver.set_angle_instant(c.vertical.channel, c.vertical.center)?;
        self.driver.set_angle_instant(c.upper_lid.channel, c.upper_lid.closed)?;
        self.driver.set_angle_instant(c.lower_lid.channel, c.lower_lid.closed)?;
        tracing::debug!("eyes at rest");
        Ok(())
    }

    /// Open both lids
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if a write fails
    pub async fn open(&mut self) -> Result<()> {
        self.stop_animation().await?;
        move_lids(&self.driver, &self.config, true).await
    }

    /// Close both lids
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if a write fails
    pub async fn close(&mut self) -> Result<()> {
        self.stop_animation().await?;
        move_lids(&self.driver, &self.config, false).await
    }

    /// Centre the gaze
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if a write fails
    pub async fn center(&mut self) -> Result<()> {
        self.stop_animation().await?;
        center_gaze(&self.driver, &self.config).await
    }

    /// Blink `times` times
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if a write fails
    pub async fn blink(&mut self, times: u32) -> Result<()> {
        self.stop_animation().await?;
        for _ in 0..times {
            blink_once(&self.driver, &self.config).await?;
        }
        Ok(())
    }

    /// Stop animating, close the lids and centre the gaze
    ///
    /// # Errors
    ///
    /// Returns `Error::Bus` if a write fails
    pub async fn sleep(&mut self) -> Result<()> {
        self.close().await?;
        self.center().await
    }

    /// Start the idle loop; no-op when it is already running
    pub fn start_animation(&mut self) {
        if self.animation.as_ref().is_some_and(|a| !a.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(idle_loop(
            Arc::clone(&self.driver),
            Arc::clone(&self.config),
            cancel.clone(),
        ));
        self.animation = Some(Animation { cancel, handle });
        tracing::debug!("eye animation started");
    }

    /// Stop the idle loop and wait for it to exit
    ///
    /// Once this returns the loop issues no further servo commands.
    ///
    /// # Errors
    ///
    /// Returns the bus error that ended the loop early, if any
    pub async fn stop_animation(&mut self) -> Result<()> {
        let Some(animation) = self.animation.take() else {
            return Ok(());
        };

        animation.cancel.cancel();
        let result = join_animation(animation.handle).await;
        tracing::debug!("eye animation stopped");
        result
    }

    /// Whether the idle loop is running
    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.animation
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    /// Surface an error from an idle loop that ended on its own
    ///
    /// # Errors
    ///
    /// Returns the bus error that ended the loop
    pub async fn check_animation(&mut self) -> Result<()> {
        if self.animation.as_ref().is_some_and(|a| a.handle.is_finished()) {
            if let Some(animation) = self.animation.take() {
                return join_animation(animation.handle).await;
            }
        }
        Ok(())
    }
}

async fn join_animation(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "eye animation task failed");
            Ok(())
        }
    }
}

/// Idle wander and random blinks until cancelled
async fn idle_loop(
    driver: Arc<ServoDriver>,
    config: Arc<EyeConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rng = StdRng::from_entropy();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            result = idle_cycle(&driver, &config, &mut rng) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "eye animation stopped by bus error");
                    return Err(e);
                }
            }
        }
    }
}

/// One wander move, maybe a blink, then a pause
async fn idle_cycle(driver: &ServoDriver, config: &EyeConfig, rng: &mut StdRng) -> Result<()> {
    let h = config.horizontal;
    let v = config.vertical;
    let h_target = rng.gen_range(h.min..=h.max).round();
    let v_target = rng.gen_range(v.min..=v.max).round();
    let blink = rng.gen_bool(config.blink_chance);

    tokio::try_join!(
        ease_to(driver, h.channel, h_target, config.wander_duration, config.step_degrees),
        ease_to(driver, v.channel, v_target, config.wander_duration, config.step_degrees),
    )?;

    if blink {
        blink_once(driver, config).await?;
    }

    tokio::time::sleep(config.cycle_pause).await;
    Ok(())
}

async fn move_lids(driver: &ServoDriver, config: &EyeConfig, open: bool) -> Result<()> {
    let (upper, lower) = (config.upper_lid, config.lower_lid);
    let (upper_target, lower_target) = if open {
        (upper.open, lower.open)
    } else {
        (upper.closed, lower.closed)
    };

    tokio::try_join!(
        ease_to(driver, upper.channel, upper_target, config.lid_duration, config.step_degrees),
        ease_to(driver, lower.channel, lower_target, config.lid_duration, config.step_degrees),
    )?;
    Ok(())
}

async fn center_gaze(driver: &ServoDriver, config: &EyeConfig) -> Result<()> {
    let (h, v) = (config.horizontal, config.vertical);
    tokio::try_join!(
        ease_to(driver, h.channel, h.center, config.center_duration, config.step_degrees),
        ease_to(driver, v.channel, v.center, config.center_duration, config.step_degrees),
    )?;
    Ok(())
}

async fn blink_once(driver: &ServoDriver, config: &EyeConfig) -> Result<()> {
    move_lids(driver, config, false).await?;
    tokio::time::sleep(config.blink_hold).await;
    move_lids(driver, config, true).await?;
    tokio::time::sleep(config.blink_hold).await;
    Ok(())
}
