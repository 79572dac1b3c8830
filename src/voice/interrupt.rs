//! Barge-in signal shared between the monitor, synthesis and playback

use tokio_util::sync::CancellationToken;

/// One-way flag raised when the user talks over playback
///
/// Created fresh for every spoken reply. Once raised it stays raised, and
/// raising it again has no further effect.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    token: CancellationToken,
}

impl InterruptFlag {
    /// Create a lowered flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn raise(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("interrupt raised");
        }
        self.token.cancel();
    }

    /// Whether the flag has been raised
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the flag is raised
    pub async fn raised(&self) {
        self.token.cancelled().await;
    }
}
