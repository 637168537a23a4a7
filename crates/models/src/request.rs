use super::{Dimensions, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// TaskRequest is the immutable description of a task, authored by the
/// request pipeline. The dispatch core reads its priority, creation and
/// expiration instants, and required dimensions; everything else about a
/// request (commands, environment, timeouts) is owned elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: RequestId,
    /// Display name, used only for logging.
    #[serde(default)]
    pub name: String,
    /// Scheduling priority. Lower values dispatch first.
    pub priority: u16,
    /// Instant at which the request was filed.
    pub created_ts: DateTime<Utc>,
    /// Instant after which the request must not be dispatched.
    pub expiration_ts: DateTime<Utc>,
    pub properties: TaskProperties,
}

/// TaskProperties are the portions of a request which describe what it
/// takes to execute it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProperties {
    /// Dimensions a bot must offer for this request to be dispatched to it.
    #[serde(default)]
    pub dimensions: Dimensions,
}
