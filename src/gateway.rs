//! Hand-off of packaged artifacts to whatever hosts them.
//!
//! The crate makes no network calls; hosting integrations implement [`DeploymentGateway`].
//! [`LocalDirectoryGateway`] publishes into `<root>/<artifact_id>/`, which is also what a hosted
//! job's output directory looks like.

use std::path::{Path, PathBuf};

use crate::app_dirs;
use crate::artifact::Artifact;
use crate::error::{CogniError, Result};

/// Where a published artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub artifact_id: String,
    /// Gateway-specific location, for example a directory or a URL.
    pub location: String,
}

/// Publishes artifacts to a serving environment.
pub trait DeploymentGateway {
    fn publish(&self, artifact: &Artifact) -> Result<Publication>;
}

/// Writes each artifact into its own directory under a root.
#[derive(Debug, Clone)]
pub struct LocalDirectoryGateway {
    root: PathBuf,
}

impl LocalDirectoryGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Gateway rooted at the application's `artifacts` directory.
    pub fn in_app_dir() -> Result<Self> {
        let root = app_dirs::artifacts_dir()
            .map_err(|err| CogniError::invalid_argument("artifacts_dir", err.to_string()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DeploymentGateway for LocalDirectoryGateway {
    fn publish(&self, artifact: &Artifact) -> Result<Publication> {
        let dir = self.root.join(&artifact.artifact_id);
        artifact.save(&dir)?;
        tracing::info!(
            artifact_id = %artifact.artifact_id,
            location = %dir.display(),
            "Artifact published"
        );
        Ok(Publication {
            artifact_id: artifact.artifact_id.clone(),
            location: dir.display().to_string(),
        })
    }
}
