//! Project life-cycle stages.
//!
//! A project walks through a fixed sequence of stages (CubeMX `.ioc` file
//! present, config saved, code generated, ...). [`ProjectState`] records which
//! stage conditions currently hold and derives the last consistent stage.

use std::fmt;

use serde::Serialize;

/// Stages in life-cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStage {
    Undefined,
    Empty,
    Initialized,
    Generated,
    PioInitialized,
    Patched,
    Built,
}

impl ProjectStage {
    /// All stages in order.
    pub const ALL: [ProjectStage; 7] = [
        ProjectStage::Undefined,
        ProjectStage::Empty,
        ProjectStage::Initialized,
        ProjectStage::Generated,
        ProjectStage::PioInitialized,
        ProjectStage::Patched,
        ProjectStage::Built,
    ];

    /// Identifier used by the front-end, e.g. `PIO_INITIALIZED`.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Empty => "EMPTY",
            Self::Initialized => "INITIALIZED",
            Self::Generated => "GENERATED",
            Self::PioInitialized => "PIO_INITIALIZED",
            Self::Patched => "PATCHED",
            Self::Built => "BUILT",
        }
    }
}

impl fmt::Display for ProjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Undefined => "The project is messed up",
            Self::Empty => ".ioc file is present",
            Self::Initialized => "stm32pio initialized",
            Self::Generated => "CubeMX code generated",
            Self::PioInitialized => "PlatformIO project initialized",
            Self::Patched => "PlatformIO project patched",
            Self::Built => "PlatformIO project built",
        };
        f.write_str(text)
    }
}

/// Which stage conditions hold, in stage order.
///
/// `Undefined` is always fulfilled and acts as the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectState {
    stages: Vec<(ProjectStage, bool)>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self::from_fulfilled(&[])
    }
}

impl ProjectState {
    /// Builds a state where exactly `fulfilled` (plus `Undefined`) hold.
    #[must_use]
    pub fn from_fulfilled(fulfilled: &[ProjectStage]) -> Self {
        let stages = ProjectStage::ALL
            .iter()
            .map(|stage| {
                (
                    *stage,
                    *stage == ProjectStage::Undefined || fulfilled.contains(stage),
                )
            })
            .collect();
        Self { stages }
    }

    /// Whether `stage` holds.
    #[must_use]
    pub fn is_fulfilled(&self, stage: ProjectStage) -> bool {
        self.stages
            .iter()
            .any(|(candidate, value)| *candidate == stage && *value)
    }

    /// Stages and their values, excluding `Undefined`.
    pub fn iter(&self) -> impl Iterator<Item = (ProjectStage, bool)> + '_ {
        self.stages
            .iter()
            .copied()
            .filter(|(stage, _)| *stage != ProjectStage::Undefined)
    }

    /// The last stage of the leading run of fulfilled stages, or `Undefined`
    /// when a fulfilled stage follows an unfulfilled one.
    #[must_use]
    pub fn current_stage(&self) -> ProjectStage {
        let mut last_consistent = ProjectStage::Undefined;
        let mut gap_found = false;

        for (stage, fulfilled) in &self.stages {
            if *fulfilled {
                if gap_found {
                    return ProjectStage::Undefined;
                }
                last_consistent = *stage;
            } else {
                gap_found = true;
            }
        }

        last_consistent
    }

    /// Whether the stages were gone through consecutively.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.current_stage() != ProjectStage::Undefined
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .iter()
            .map(|(stage, fulfilled)| {
                format!("{}  {}", if fulfilled { "[*]" } else { "[ ]" }, stage)
            })
            .collect();
        f.write_str(&lines.join("\n"))
    }
}
