//! Screenshot-endpoint polling that gates "the VM is ready".
//!
//! A sandbox is ready once `GET {base}/screenshot` answers 200; everything
//! else (non-200 statuses, transport faults, per-request timeouts) just
//! means "not yet". The only error surfaced is the overall deadline.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use url::Url;

use crate::error::{ProvisionError, Result};

/// Well-known screenshot path on the VM's control API.
pub const SCREENSHOT_PATH: &str = "/screenshot";

/// Timing knobs for [`wait_for_vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Overall wall-clock deadline.
    pub timeout: Duration,
    /// Pause between probe attempts.
    pub poll_interval: Duration,
    /// Per-request bound (connect + read).
    pub request_timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Block until the sandbox serves a screenshot or the deadline passes.
///
/// Returns the first 200 response's body bytes. Individual attempt failures
/// are never surfaced; the elapsed check happens before each attempt, so the
/// deadline error fires within one poll interval of `config.timeout`.
pub async fn wait_for_vm(
    client: &reqwest::Client,
    base_url: &str,
    bearer_token: Option<&str>,
    config: &WaitConfig,
) -> Result<Vec<u8>> {
    let screenshot_url = Url::parse(base_url)
        .and_then(|base| base.join(SCREENSHOT_PATH))
        .map_err(|e| ProvisionError::InvalidUrl(format!("{base_url}: {e}")))?;

    let started = Instant::now();
    let mut attempt = 1u32;
    loop {
        if started.elapsed() >= config.timeout {
            return Err(ProvisionError::ReadyTimeout(config.timeout));
        }

        if let Some(image) =
            capture_screenshot(client, &screenshot_url, bearer_token, config.request_timeout).await
        {
            info!(attempt, "virtual machine is ready");
            return Ok(image);
        }

        debug!(attempt, "virtual machine not ready yet");
        attempt += 1;
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// One probe: `Some(bytes)` on a 200 response, `None` on anything else.
async fn capture_screenshot(
    client: &reqwest::Client,
    url: &Url,
    bearer_token: Option<&str>,
    request_timeout: Duration,
) -> Option<Vec<u8>> {
    let mut request = client.get(url.clone()).timeout(request_timeout);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.ok()?;
    if response.status() != reqwest::StatusCode::OK {
        return None;
    }
    response.bytes().await.ok().map(|body| body.to_vec())
}
