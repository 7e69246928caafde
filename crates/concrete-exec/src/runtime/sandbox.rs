//! Permissions checked by host natives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Operation guarded by the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    /// Reading a file
    FileRead,
    /// Creating or writing a file
    FileWrite,
    /// Opening a connection
    Network,
    /// Terminating the worker process
    ProcessExit,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FileRead => "file-read",
            Self::FileWrite => "file-write",
            Self::Network => "network",
            Self::ProcessExit => "process-exit",
        };
        f.write_str(name)
    }
}

/// Set of denied permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    denied: BTreeSet<Permission>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            denied: [
                Permission::FileRead,
                Permission::FileWrite,
                Permission::Network,
                Permission::ProcessExit,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl SandboxPolicy {
    /// Policy that allows everything
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            denied: BTreeSet::new(),
        }
    }

    /// Allow a permission
    #[must_use]
    pub fn allow(mut self, permission: Permission) -> Self {
        self.denied.remove(&permission);
        self
    }

    /// Deny a permission
    #[must_use]
    pub fn deny(mut self, permission: Permission) -> Self {
        self.denied.insert(permission);
        self
    }

    /// Whether the permission is granted
    #[must_use]
    pub fn permits(&self, permission: Permission) -> bool {
        !self.denied.contains(&permission)
    }
}
