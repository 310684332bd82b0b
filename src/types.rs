//! Shared enums for the updater
//!
//! Stringly-typed distro names and step outcomes from shell scripts are
//! replaced with enums so every match is exhaustive.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Operating-environment family, derived from `/etc/os-release`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Arch Linux and derivatives that share its packaging (CachyOS)
    #[strum(serialize = "arch")]
    #[serde(rename = "arch")]
    ArchLike,
    #[strum(serialize = "ubuntu")]
    Ubuntu,
    #[strum(serialize = "debian")]
    Debian,
    #[default]
    #[strum(serialize = "unknown")]
    Unknown,
}

impl Category {
    /// Map an os-release `ID` value to a category.
    ///
    /// Matching is exact after trimming quotes and whitespace; derivatives that
    /// are not listed here are `Unknown`.
    pub fn from_os_id(id: &str) -> Self {
        let id = id.trim().trim_matches(|c| c == '"' || c == '\'');
        match id {
            "arch" | "cachyos" => Self::ArchLike,
            "ubuntu" => Self::Ubuntu,
            "debian" => Self::Debian,
            _ => Self::Unknown,
        }
    }

    /// Returns true for any category other than `Unknown`
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Human-readable distribution family name
    pub const fn label(self) -> &'static str {
        match self {
            Self::ArchLike => "Arch Linux / CachyOS",
            Self::Ubuntu => "Ubuntu",
            Self::Debian => "Debian",
            Self::Unknown => "Unknown",
        }
    }
}

/// Per-step outcome as shown in the final report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[strum(serialize = "succeeded")]
    Succeeded,
    /// Failed, but the step was not critical so the pipeline continued
    #[strum(serialize = "failed")]
    FailedNonCritical,
    /// Failed and aborted everything after it
    #[strum(serialize = "failed (aborted)")]
    FailedAborted,
    #[strum(serialize = "not run")]
    NotRun,
}

impl StepStatus {
    /// Returns true if the step ran and exited 0
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the step ran and failed (either flavour)
    pub fn is_failure(self) -> bool {
        matches!(self, Self::FailedNonCritical | Self::FailedAborted)
    }

    /// Marker used in the text report
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Succeeded => "✓",
            Self::FailedNonCritical => "!",
            Self::FailedAborted => "✗",
            Self::NotRun => "-",
        }
    }
}
