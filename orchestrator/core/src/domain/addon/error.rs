// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::job::JobError;
use crate::domain::repository::StoreError;
use crate::domain::runtime::RuntimeError;
use thiserror::Error;

/// Coarse classification callers match on instead of individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddonErrorKind {
    /// Bad input from the user; fixable by changing options or the request.
    UserConfig,
    /// The requested operation is not valid for the add-on's current state.
    IllegalState,
    /// Docker, filesystem or persistence failure.
    InfrastructureFailure,
}

#[derive(Debug, Error)]
pub enum AddonError {
    #[error("Add-on {slug} has invalid options: {message}")]
    Configuration { slug: String, message: String },

    #[error("Add-on {0} is not installed")]
    NotInstalled(String),

    #[error("Add-on {0} is already installed")]
    AlreadyInstalled(String),

    #[error("Add-on {0} does not exist in the store")]
    NotFound(String),

    #[error("{0}")]
    NotSupported(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Docker operation for add-on {slug} failed: {source}")]
    Docker {
        slug: String,
        #[source]
        source: RuntimeError,
    },

    #[error("File operation for add-on {slug} failed: {source}")]
    Io {
        slug: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Backup for add-on {slug} failed: {message}")]
    Backup { slug: String, message: String },
}

impl AddonError {
    pub fn kind(&self) -> AddonErrorKind {
        match self {
            Self::Configuration { .. } => AddonErrorKind::UserConfig,
            Self::NotInstalled(_)
            | Self::AlreadyInstalled(_)
            | Self::NotFound(_)
            | Self::NotSupported(_)
            | Self::Invalid(_)
            | Self::Job(_) => AddonErrorKind::IllegalState,
            Self::Docker { .. } | Self::Io { .. } | Self::Store(_) | Self::Backup { .. } => {
                AddonErrorKind::InfrastructureFailure
            }
        }
    }

    /// Only unexpected failures go to error tracking.
    pub fn should_capture(&self) -> bool {
        self.kind() == AddonErrorKind::InfrastructureFailure
    }

    pub(crate) fn docker(slug: &str, source: RuntimeError) -> Self {
        Self::Docker {
            slug: slug.to_string(),
            source,
        }
    }

    pub(crate) fn io(slug: &str, source: std::io::Error) -> Self {
        Self::Io {
            slug: slug.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let config = AddonError::Configuration {
            slug: "ssh".into(),
            message: "bad".into(),
        };
        assert_eq!(config.kind(), AddonErrorKind::UserConfig);
        assert!(!config.should_capture());

        let docker = AddonError::docker("ssh", RuntimeError::Api("boom".into()));
        assert_eq!(docker.kind(), AddonErrorKind::InfrastructureFailure);
        assert!(docker.should_capture());
        assert!(std::error::Error::source(&docker).is_some());

        let job = AddonError::from(JobError::ExecutionLimitExceeded {
            group: "addon_ssh".into(),
            job: "addon_start".into(),
        });
        assert_eq!(job.kind(), AddonErrorKind::IllegalState);
    }
}
