//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DeployError;

/// Remote CPU architectures the launcher ships an agent for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64
    Amd64,
    /// aarch64
    Arm64,
}

impl Arch {
    /// Map the output of `uname -m` to a supported architecture
    pub fn from_uname(output: &str) -> Result<Self, DeployError> {
        match output.trim() {
            "x86_64" | "amd64" => Ok(Arch::Amd64),
            "aarch64" | "arm64" => Ok(Arch::Arm64),
            other => Err(DeployError::UnsupportedArch(other.to_string())),
        }
    }

    /// Short tag used in binary names
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
