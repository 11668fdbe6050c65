mod cloud;
mod docker;

pub use cloud::{CloudArgs, run_cloud};
pub use docker::{DockerArgs, run_docker};

use std::path::PathBuf;

use tracing::info;

use crate::error::CliResult;

/// Write the readiness screenshot somewhere a human can open it.
async fn save_screenshot(image: &[u8], label: &str) -> CliResult<PathBuf> {
    let path = std::env::temp_dir().join(format!("deskbox-screenshot-{label}.png"));
    tokio::fs::write(&path, image).await?;
    info!(path = %path.display(), bytes = image.len(), "screenshot saved");
    Ok(path)
}

/// Shorten a container/sandbox ID for file names and log lines.
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
