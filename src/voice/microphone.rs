//! Exclusive access to the single physical microphone
//!
//! The conversation loop and the barge-in listener both capture audio. The
//! arbiter hands out one lease at a time; holders are served in the order
//! they asked (tokio's mutex is fair).

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::capture::{AudioSource, Capture};
use crate::Result;

/// Grants exclusive microphone access
pub struct MicrophoneArbiter {
    source: Mutex<Box<dyn AudioSource>>,
}

/// Exclusive use of the microphone until dropped
pub struct MicrophoneLease<'a> {
    guard: MutexGuard<'a, Box<dyn AudioSource>>,
}

impl MicrophoneArbiter {
    /// Wrap an audio source
    #[must_use]
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }

    /// Wait until the microphone is free and take it
    pub async fn acquire(&self) -> MicrophoneLease<'_> {
        MicrophoneLease {
            guard: self.source.lock().await,
        }
    }

    /// Take the microphone without waiting, if it is free
    #[must_use]
    pub fn try_acquire(&self) -> Option<MicrophoneLease<'_>> {
        self.source
            .try_lock()
            .ok()
            .map(|guard| MicrophoneLease { guard })
    }

    /// Acquire, capture one utterance, and release
    ///
    /// The lease is released before this returns, so transcription of the
    /// result never blocks another capture.
    ///
    /// # Errors
    ///
    /// Returns the audio source's device error
    pub async fn capture_utterance(&self, timeout: Duration, phrase_limit: Duration) -> Result<Capture> {
        self.capture_until(timeout, phrase_limit, &CancellationToken::new())
            .await
    }

    /// Like [`capture_utterance`](Self::capture_utterance), but gives up
    /// with `TimedOut` as soon as `cancel` fires, whether still waiting for
    /// the lease or already capturing
    ///
    /// # Errors
    ///
    /// Returns the audio source's device error
    pub async fn capture_until(
        &self,
        timeout: Duration,
        phrase_limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Capture> {
        let mut lease = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Capture::TimedOut),
            lease = self.acquire() => lease,
        };
        lease.listen(timeout, phrase_limit, cancel).await
    }
}

impl Deref for MicrophoneLease<'_> {
    type Target = dyn AudioSource;

    fn deref(&self) -> &Self::Target {
        self.guard.as_ref()
    }
}

impl DerefMut for MicrophoneLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Silent;

    #[async_trait]
    impl AudioSource for Silent {
        async fn listen(
            &mut self,
            _timeout: Duration,
            _phrase_limit: Duration,
            _cancel: &CancellationToken,
        ) -> Result<Capture> {
            Ok(Capture::TimedOut)
        }
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let arbiter = MicrophoneArbiter::new(Box::new(Silent));
        let lease = arbiter.acquire().await;
        assert!(arbiter.try_acquire().is_none());
        drop(lease);
        assert!(arbiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_capture_releases_lease() {
        let arbiter = MicrophoneArbiter::new(Box::new(Silent));
        let capture = arbiter
            .capture_utterance(Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(capture, Capture::TimedOut);
        assert!(arbiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_capture_skips_waiting_for_lease() {
        let arbiter = MicrophoneArbiter::new(Box::new(Silent));
        let _held = arbiter.acquire().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let capture = arbiter
            .capture_until(Duration::from_secs(1), Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(capture, Capture::TimedOut);
    }
}
