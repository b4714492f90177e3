/*!
Snapshot shapes for pausing and resuming runs.

Design goals:
- Explicit serde-friendly structs decoupled from the in-memory runtime
  state, so the state module stays lean and the wire shape is obvious.
- A required version tag: an older snapshot loaded by a newer engine fails
  fast with [`SnapshotError::UnsupportedVersion`] instead of silently
  truncating state.
- No I/O here. Callers receive opaque bytes from
  [`GraphRuntimeState::dumps`](crate::state::GraphRuntimeState::dumps) and
  hand them back verbatim; where those bytes live is their concern.
*/

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::segment::Segment;
use crate::types::RouteState;

/// Current snapshot format version. Bump on any incompatible shape change.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One variable pool entry in persisted form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedVariable {
    pub selector: Vec<String>,
    pub value: Segment,
}

/// Complete persisted shape of a `GraphRuntimeState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedRuntimeState {
    /// Format version; checked before any other field is interpreted.
    pub version: u32,
    /// RFC3339 string form of the run start time.
    pub started_at: String,
    pub completed: bool,
    #[serde(default)]
    pub variables: Vec<PersistedVariable>,
    #[serde(default)]
    pub outputs: FxHashMap<String, Value>,
    #[serde(default)]
    pub node_states: FxHashMap<String, RouteState>,
    #[serde(default)]
    pub edge_states: FxHashMap<String, RouteState>,
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub failed_nodes: Vec<String>,
    #[serde(default)]
    pub paused_node: Option<String>,
}

impl PersistedRuntimeState {
    /// Serialize to the opaque byte form handed to callers.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(self).map_err(|source| SnapshotError::Serde { source })
    }

    /// Decode bytes, verifying the version tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let state: PersistedRuntimeState =
            serde_json::from_slice(bytes).map_err(|source| SnapshotError::Serde { source })?;
        if state.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: state.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(state)
    }
}

/// Errors raised while encoding or decoding snapshots.
///
/// Snapshot corruption is fatal: there is no partial recovery, the caller
/// must fall back to a fresh run.
#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (engine supports {expected})")]
    #[diagnostic(
        code(flowmesh::snapshot::unsupported_version),
        help("The snapshot was produced by an incompatible engine release; re-run from scratch.")
    )]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("snapshot serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(flowmesh::snapshot::serde),
        help("The snapshot bytes are corrupt or were not produced by dumps().")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot field invalid: {0}")]
    #[diagnostic(code(flowmesh::snapshot::invalid_field))]
    InvalidField(&'static str),
}
