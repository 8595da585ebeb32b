use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A programming environment available on a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
}

/// A scheduler partition of the current system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Fully qualified partition name, e.g. `daint:gpu`.
    pub fullname: String,
    pub environs: Vec<Environment>,
}

/// The system the framework is currently running on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub name: String,
    pub partitions: Vec<Partition>,
}

/// The runtime collaborator: exposes the current system's topology.
///
/// The core performs no I/O beyond reading this topology, which is
/// typically loaded once from a site configuration file at startup.
#[derive(Debug, Clone)]
pub struct Runtime {
    system: System,
}

impl Runtime {
    pub fn new(system: System) -> Self {
        Self { system }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    /// Full names of all partitions of the current system, in
    /// configuration order.
    pub fn partition_names(&self) -> Vec<String> {
        self.system
            .partitions
            .iter()
            .map(|p| p.fullname.clone())
            .collect()
    }

    /// Union of environment names across all partitions, first-seen order.
    pub fn environ_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for part in &self.system.partitions {
            for env in &part.environs {
                if !names.iter().any(|n| n == &env.name) {
                    names.push(env.name.clone());
                }
            }
        }
        names
    }

    /// Build a runtime from a JSON system-topology document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the document does not
    /// describe a valid system.
    pub fn from_json(doc: &str) -> Result<Self, CoreError> {
        let system: System = serde_json::from_str(doc)
            .map_err(|e| CoreError::Configuration(format!("invalid system topology: {e}")))?;
        Ok(Self::new(system))
    }

    /// Load a runtime from a JSON system-topology file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if the file cannot be read or
    /// does not describe a valid system.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let doc = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("cannot read topology {}: {e}", path.display()))
        })?;
        Self::from_json(&doc)
    }
}
