use crate::error::Error;
use crate::{dimensions, queue_key};
use chrono::{DateTime, Utc};
use models::{RequestId, TaskRequest};
use serde::{Deserialize, Serialize};

/// ReadyEntry marks a TaskRequest as eligible to be dispatched to a bot.
/// There is exactly one entry per request, sharing its identity.
///
/// The record is kept minimal: it is re-written inside a transaction on
/// every scheduling event, and the expiration sweep walks all of the
/// available ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEntry {
    /// Identity of the owning request.
    pub request_id: RequestId,
    /// Fingerprint of the request's dimensions, per `dimensions::hash`.
    /// Immutable.
    pub dimensions_hash: u32,
    /// Copy of the request's deadline, for expiration queries. Immutable.
    pub expiration_ts: DateTime<Utc>,
    /// Ordering key of this entry, per `queue_key::pack`. Present exactly
    /// when the entry is available for dispatch; no other field or flag is
    /// authoritative for availability.
    pub queue_number: Option<u64>,
}

impl ReadyEntry {
    /// Builds the ready-queue entry of a freshly filed request, keyed on
    /// the request's priority and submission instant and available for
    /// dispatch.
    pub fn new(request: &TaskRequest) -> Result<Self, Error> {
        validate(request.id)?;
        Ok(Self {
            request_id: request.id,
            dimensions_hash: dimensions::hash(&request.properties.dimensions),
            expiration_ts: request.expiration_ts,
            queue_number: Some(queue_key::pack(request.priority, request.created_ts)?),
        })
    }

    pub fn is_available(&self) -> bool {
        self.queue_number.is_some()
    }

    /// Key under which this entry is marked in the negative cache.
    pub fn negative_cache_key(&self) -> String {
        negative_cache_key(self.request_id)
    }
}

/// Compact cache rendering of a request identity.
pub fn negative_cache_key(id: RequestId) -> String {
    format!("{:x}", id.as_u64())
}

/// Asserts that `id` structurally refers to a ready-queue entry. The zero
/// identity is reserved and refers to nothing.
pub fn validate(id: RequestId) -> Result<(), Error> {
    if id.is_zero() {
        return Err(Error::InvalidEntryKind(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::TaskProperties;
    use serde_json::json;

    fn request() -> TaskRequest {
        TaskRequest {
            id: RequestId::new(0x100),
            name: "Request name".to_string(),
            priority: 50,
            created_ts: "2014-01-02T03:04:05Z".parse().unwrap(),
            expiration_ts: "2014-01-02T03:05:05Z".parse().unwrap(),
            properties: TaskProperties {
                dimensions: serde_json::from_value(json!({"OS": "Windows-3.1.1"})).unwrap(),
            },
        }
    }

    #[test]
    fn test_new_entry_is_available() {
        let entry = ReadyEntry::new(&request()).unwrap();

        assert_eq!(entry.request_id, RequestId::new(0x100));
        assert_eq!(entry.dimensions_hash, 0xf50681b3);
        assert_eq!(entry.expiration_ts, request().expiration_ts);
        assert_eq!(entry.queue_number, Some(0x19014350e8688800));
        assert!(entry.is_available());
    }

    #[test]
    fn test_new_entry_rejects_bad_priority() {
        let mut bad = request();
        bad.priority = 1000;
        assert!(matches!(
            ReadyEntry::new(&bad),
            Err(Error::InvalidPriority(1000)),
        ));
    }

    #[test]
    fn test_negative_cache_key_is_unpadded_hex() {
        let entry = ReadyEntry::new(&request()).unwrap();
        assert_eq!(entry.negative_cache_key(), "100");
        assert_eq!(negative_cache_key(RequestId::new(0x014350e868881200)), "14350e868881200");
    }

    #[test]
    fn test_validate() {
        assert!(validate(RequestId::new(0x100)).is_ok());
        assert!(matches!(
            validate(RequestId::new(0)),
            Err(Error::InvalidEntryKind(_)),
        ));
    }
}
