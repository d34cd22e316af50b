use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the synthesis pipeline.
#[derive(Debug, Error)]
pub enum SynthError {
    /// Checkpoint missing, unreadable or incompatible with the configured network.
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Malformed latent vector or categorical code. Raised before any evaluation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Backend failure during the forward pass.
    #[error("evaluation error{}: {message}", stage_suffix(.stage))]
    Evaluation {
        stage: Option<String>,
        message: String,
    },

    /// Artifact write failure. Artifacts already written are left in place.
    #[error("storage error{} at {}: {source}", stage_suffix(.stage), .path.display())]
    Storage {
        stage: Option<String>,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{0}' not found")]
    UnknownStage(String),
}

fn stage_suffix(stage: &Option<String>) -> String {
    match stage {
        Some(name) => format!(" in stage '{name}'"),
        None => String::new(),
    }
}

impl SynthError {
    pub(crate) fn evaluation(stage: Option<&str>, message: impl ToString) -> Self {
        SynthError::Evaluation {
            stage: stage.map(str::to_string),
            message: message.to_string(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SynthError::Storage {
            stage: None,
            path: path.into(),
            source,
        }
    }

    /// Attach the stage name to an evaluation or storage error that lacks one.
    pub fn in_stage(self, name: &str) -> Self {
        match self {
            SynthError::Evaluation { stage: None, message } => SynthError::Evaluation {
                stage: Some(name.to_string()),
                message,
            },
            SynthError::Storage { stage: None, path, source } => SynthError::Storage {
                stage: Some(name.to_string()),
                path,
                source,
            },
            other => other,
        }
    }

    /// The stage this error is annotated with, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            SynthError::Evaluation { stage, .. } | SynthError::Storage { stage, .. } => {
                stage.as_deref()
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SynthError>;
