//! Bounded polling for an image to appear in the engine's image list.

use std::time::Duration;

use chartscan_core::error::{Result, ScanError};
use chartscan_core::EngineConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ContainerEngine, ImageSummary};

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            timeout: config.pull_timeout,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Poll `list_images` until one of the repo tags contains `reference`.
///
/// The first poll happens one interval after the call. This observes the
/// image list only; it does not synchronize with the pull itself.
pub async fn wait_for_image<E>(
    engine: &E,
    reference: &str,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
) -> Result<ImageSummary>
where
    E: ContainerEngine + ?Sized,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let period = policy.poll_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(started + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut polls = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ScanError::Cancelled(format!("waiting for image {}", reference)));
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(ScanError::TimeoutError(format!(
                    "image {} did not appear within {:?}",
                    reference, policy.timeout
                )));
            }
            _ = ticker.tick() => {
                polls += 1;
                let images = engine.list_images().await?;
                if let Some(found) = images
                    .into_iter()
                    .find(|image| image.repo_tags.iter().any(|tag| tag.contains(reference)))
                {
                    tracing::debug!(
                        reference = %reference,
                        polls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Image available"
                    );
                    return Ok(found);
                }
                tracing::trace!(reference = %reference, polls, "Image not available yet");
            }
        }
    }
}
