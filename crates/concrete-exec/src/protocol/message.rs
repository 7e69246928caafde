//! Worker protocol messages.
//!
//! Requests and responses carry a correlation id; payloads are opaque
//! bincode blobs that only the two endpoints interpret.

use crate::model::ClassId;
use crate::result::{ExecError, ExecResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id of a request
pub type RequestId = u64;

/// Command sent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Extend the class path
    AddPaths {
        /// Catalog entries to add
        entries: Vec<String>,
    },
    /// Load and instrument every user class
    Warmup,
    /// Replace the instrumentation settings
    SetInstrumentation {
        /// Encoded instrumentation settings
        payload: Vec<u8>,
    },
    /// Run one executable
    Invoke {
        /// Class the executable is resolved in
        class: ClassId,
        /// Executable signature, e.g. `add(int,int)int`
        signature: String,
        /// Encoded execution data
        payload: Vec<u8>,
    },
    /// Coverage accumulated for a class
    CollectCoverage {
        /// Class to report on
        class: ClassId,
    },
    /// Model of a static field
    ComputeStaticField {
        /// Encoded field reference
        payload: Vec<u8>,
    },
    /// Reply, then exit
    StopProcess,
}

impl Command {
    /// Short name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddPaths { .. } => "addPaths",
            Self::Warmup => "warmup",
            Self::SetInstrumentation { .. } => "setInstrumentation",
            Self::Invoke { .. } => "invoke",
            Self::CollectCoverage { .. } => "collectCoverage",
            Self::ComputeStaticField { .. } => "computeStaticField",
            Self::StopProcess => "stopProcess",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Answer to a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Class path extended
    PathsAdded {
        /// Number of classes now available
        count: usize,
    },
    /// Warmup finished
    WarmedUp {
        /// Number of classes loaded
        classes: usize,
    },
    /// Instrumentation settings replaced
    InstrumentationSet,
    /// Execution finished
    Invoked {
        /// Encoded execution result
        payload: Vec<u8>,
    },
    /// Coverage report
    Coverage {
        /// Encoded class coverage
        payload: Vec<u8>,
    },
    /// Static field model
    StaticField {
        /// Encoded model
        payload: Vec<u8>,
    },
    /// The worker is about to exit
    Stopping,
    /// The worker could not serve the command. A fatal failure means the
    /// worker is about to exit.
    Failed {
        /// What went wrong
        message: String,
        /// Whether the worker must be replaced
        fatal: bool,
    },
}

impl Reply {
    /// Failure reply for an error
    #[must_use]
    pub fn from_error(err: &ExecError) -> Self {
        Self::Failed {
            message: err.to_string(),
            fatal: err.is_fatal(),
        }
    }

    /// Turn a failure reply back into an error
    pub fn into_result(self) -> ExecResult<Self> {
        match self {
            Self::Failed { message, fatal: true } => Err(ExecError::poisoned(message)),
            Self::Failed { message, fatal: false } => Err(ExecError::Remote { message }),
            other => Ok(other),
        }
    }
}

/// Framed message from client to worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the response
    pub id: RequestId,
    /// What to do
    pub command: Command,
}

/// Framed message from worker to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request answered
    pub id: RequestId,
    /// The answer
    pub reply: Reply,
}

/// Encode a payload
pub fn encode_payload<T: Serialize>(value: &T) -> ExecResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a payload
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> ExecResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_reply_maps_to_error() {
        let fatal = Reply::from_error(&ExecError::poisoned("stuck"));
        assert!(matches!(fatal.into_result(), Err(ExecError::WorkerPoisoned { .. })));

        let remote = Reply::from_error(&ExecError::class_not_found("samples.Gone"));
        let err = remote.into_result().unwrap_err();
        assert!(err.to_string().contains("samples.Gone"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_ok_reply_passes_through() {
        assert_eq!(Reply::Stopping.into_result().unwrap(), Reply::Stopping);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Warmup.to_string(), "warmup");
        let invoke = Command::Invoke {
            class: ClassId::new("samples.Calculator"),
            signature: "add(int,int)int".to_string(),
            payload: vec![],
        };
        assert_eq!(invoke.name(), "invoke");
    }
}
