use std::{collections::HashSet, rc::Rc};

use derive_ex::Ex;
use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::{path::top_level, Derive, DependencyGraph, NoDerive, PhaseConfig};


/// Declarations shared by every surface of one kind.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

impl SurfaceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))
    }

    pub fn with_phase(mut self, phase: PhaseConfig) -> Self {
        self.phases.push(phase);
        self
    }
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[display("invalid surface config: {0}")]
    Json(String),
    #[display("field `{0}` is animated more than once")]
    DuplicatePhase(String),
    #[display("field `{0}` is derived and cannot own a phase field")]
    DerivedPhase(String),
    #[display("phase field `{0}` collides with another field")]
    PhaseFieldConflict(String),
}

impl std::error::Error for ConfigError {}

/// The dependency graph and phase declarations of one kind of surface.
///
/// Surfaces receive the registry explicitly, so several surfaces of the same
/// kind share one immutable instance.
#[derive(Debug, Ex)]
#[derive_ex(Default)]
pub struct Registry<D: Derive = NoDerive> {
    graph: DependencyGraph<D>,
    phases: Vec<PhaseConfig>,
    phase_fields: Vec<String>,
}

impl<D: Derive> Registry<D> {
    pub fn new(config: SurfaceConfig, graph: DependencyGraph<D>) -> Result<Rc<Self>, ConfigError> {
        let mut fields = HashSet::new();
        for phase in &config.phases {
            let field = phase.field.as_str();
            if !fields.insert(field) {
                return Err(ConfigError::DuplicatePhase(field.to_owned()));
            }
            if graph.is_derived(top_level(field)) {
                return Err(ConfigError::DerivedPhase(field.to_owned()));
            }
        }
        let mut phase_fields = HashSet::new();
        for phase_field in config.phases.iter().map(PhaseConfig::phase_field_name) {
            if phase_field.contains('.')
                || graph.is_derived(&phase_field)
                || !phase_fields.insert(phase_field.clone())
            {
                return Err(ConfigError::PhaseFieldConflict(phase_field));
            }
        }
        for field in &fields {
            let head = top_level(field);
            if phase_fields.contains(head) {
                return Err(ConfigError::PhaseFieldConflict(head.to_owned()));
            }
        }
        Ok(Rc::new(Self {
            graph,
            phase_fields: config.phases.iter().map(PhaseConfig::phase_field_name).collect(),
            phases: config.phases,
        }))
    }

    pub fn graph(&self) -> &DependencyGraph<D> {
        &self.graph
    }
    pub fn phases(&self) -> &[PhaseConfig] {
        &self.phases
    }

    /// Returns `true` if `path` lies under a derived field or a phase field.
    ///
    /// Such fields are computed locally and never edited or merged.
    pub fn is_computed(&self, path: &str) -> bool {
        let head = top_level(path);
        self.graph.is_derived(head) || self.phase_fields.iter().any(|f| f == head)
    }
}
