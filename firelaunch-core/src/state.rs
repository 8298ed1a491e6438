use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::id::VmId;

/// Coarse status reported for every listed VM.
pub const STATUS_RUNNING: &str = "running";

/// Point-in-time view of a VM known to the runtime.
///
/// Built fresh on every listing; the runtime is the source of truth, so
/// nothing here is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmState {
    pub id: VmId,
    /// Guest address recovered from the launch annotation, when present.
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

impl VmState {
    /// Creation time formatted as RFC 3339 with second precision.
    #[must_use]
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
