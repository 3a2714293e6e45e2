//! Navigation side effect produced by a finished login

use std::time::Duration;

/// Where to go once a form flow succeeds, and how long to show success first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub route: String,
    pub delay: Duration,
}

impl Navigation {
    pub fn new(route: impl Into<String>, delay: Duration) -> Self {
        Self {
            route: route.into(),
            delay,
        }
    }

    /// Navigate without a display delay
    pub fn immediate(route: impl Into<String>) -> Self {
        Self::new(route, Duration::ZERO)
    }

    /// Wait out the display delay
    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}
