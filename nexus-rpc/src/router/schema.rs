//! Router introspection
//!
//! A serializable description of every procedure in a router, suitable for
//! documentation tooling or a client-side manifest.

use crate::meta::Meta;
use crate::middleware::ProcedureType;
use serde::{Deserialize, Serialize};

/// Description of one procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureSchema {
    /// Dotted path
    pub path: String,
    /// Query, mutation or subscription
    pub kind: ProcedureType,
    /// User meta, uninterpreted
    pub meta: Meta,
    /// Whether an input parser is attached
    pub has_input: bool,
    /// Whether an output parser is attached
    pub has_output: bool,
    /// Number of middleware layers
    pub middleware: usize,
}

/// Description of a whole router, in path order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterSchema {
    /// One entry per procedure
    pub procedures: Vec<ProcedureSchema>,
}

impl RouterSchema {
    /// Find the entry for a dotted path.
    pub fn find(&self, path: &str) -> Option<&ProcedureSchema> {
        self.procedures.iter().find(|p| p.path == path)
    }

    /// Paths of all procedures of the given kind.
    pub fn paths_of(&self, kind: ProcedureType) -> Vec<&str> {
        self.procedures
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.path.as_str())
            .collect()
    }
}
