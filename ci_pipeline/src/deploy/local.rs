//! Copy the artifact to a path on the build host.

use std::path::Path;

use super::DeployError;
use crate::definition::LocalDeployment;

pub async fn deploy(artifact: &Path, target: &LocalDeployment) -> Result<(), DeployError> {
    let fail = |source: std::io::Error| DeployError::Local {
        path: target.path.clone(),
        source,
    };

    let bytes = tokio::fs::read(artifact).await.map_err(fail)?;
    let destination = Path::new(&target.path);
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    tokio::fs::write(destination, &bytes).await.map_err(fail)?;

    tracing::info!(
        artifact = %artifact.display(),
        destination = %target.path,
        bytes = bytes.len(),
        "Local deployment written"
    );
    Ok(())
}
