use crate::driver::hierarchy::TreeNode;
use thiserror::Error;

/// Failures raised by command handlers
///
/// Skipping is not an error; see `CommandOutcome::Skipped`.
#[derive(Debug, Error)]
pub enum OrchestraError {
    #[error("{message}")]
    ElementNotFound {
        message: String,
        hierarchy: Box<TreeNode>,
    },

    #[error("{message}")]
    AssertionFailure {
        message: String,
        hierarchy: Box<TreeNode>,
    },

    #[error("{0}")]
    UnableToLaunchApp(String),

    #[error("{0}")]
    UnableToClearState(String),

    #[error("{0}")]
    UnableToCopyTextFromElement(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Unicode character input is not supported: {0}. Please use ASCII characters instead.")]
    UnicodeNotSupported(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

impl OrchestraError {
    pub fn is_element_not_found(&self) -> bool {
        matches!(self, OrchestraError::ElementNotFound { .. })
    }

    /// Hierarchy captured when the error was raised, if any
    pub fn hierarchy(&self) -> Option<&TreeNode> {
        match self {
            OrchestraError::ElementNotFound { hierarchy, .. }
            | OrchestraError::AssertionFailure { hierarchy, .. } => Some(hierarchy.as_ref()),
            _ => None,
        }
    }
}

pub type OrchestraResult<T> = Result<T, OrchestraError>;
