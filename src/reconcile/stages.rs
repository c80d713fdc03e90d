//! Staged Sub-Pipelines
//!
//! Named pipelines for partial rollouts. Every stage has a pipeline; stages
//! that were not configured get an empty one.

use super::pipeline::Pipeline;
use crate::error::{Error, Result};
use crate::resources::ResourceKind;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Named pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Main,
    Driver,
    DevicePlugin,
    Monitoring,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Main,
        Stage::Driver,
        Stage::DevicePlugin,
        Stage::Monitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Main => "main",
            Stage::Driver => "driver",
            Stage::DevicePlugin => "device-plugin",
            Stage::Monitoring => "monitoring",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| Error::Configuration(format!("Unknown stage: {}", s)))
    }
}

/// One pipeline per stage, fixed once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSet {
    pipelines: BTreeMap<Stage, Pipeline>,
}

impl PipelineSet {
    /// The standard main pipeline plus one pipeline per configured stage.
    ///
    /// An entry for [`Stage::Main`] in `stages` replaces the standard main
    /// pipeline.
    pub fn new(with_scc: bool, stages: &BTreeMap<Stage, Vec<ResourceKind>>) -> Self {
        let pipelines = Stage::ALL
            .into_iter()
            .map(|stage| {
                let pipeline = match (stage, stages.get(&stage)) {
                    (_, Some(kinds)) => Pipeline::for_kinds(stage, kinds),
                    (Stage::Main, None) => Pipeline::standard(with_scc),
                    (_, None) => Pipeline::empty(stage),
                };
                (stage, pipeline)
            })
            .collect();
        Self { pipelines }
    }

    pub fn get(&self, stage: Stage) -> Option<&Pipeline> {
        self.pipelines.get(&stage)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stage, &Pipeline)> {
        self.pipelines.iter()
    }
}

impl Default for PipelineSet {
    fn default() -> Self {
        Self::new(false, &BTreeMap::new())
    }
}
