use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Pipeline events
    PipelineStateChanged {
        /// None when the pipeline had never recorded a state
        from_state: Option<String>,
        to_state: String,
        /// Who requested the change (None for startup)
        user_id: Option<String>,
    },

    // Deposit lifecycle
    DepositRegistered {
        deposit_id: String,
        registered_by: Option<String>,
        /// Names of the fields supplied at registration
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },
    DepositStateChanged {
        deposit_id: String,
        from_state: String,
        to_state: String,
        /// Operation that caused the change (e.g. "pause", "job_failure")
        reason: Option<String>,
        user_id: Option<String>,
    },
    /// Deposit record was permanently removed.
    DepositDestroyed {
        deposit_id: String,
        destroyed_by: Option<String>,
        previous_state: String,
    },
    /// Results notification for a deposit that reached a terminal state.
    DepositResultsSent {
        deposit_id: String,
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    DepositCompleted {
        deposit_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<String>,
    },

    // Job events
    JobStarted {
        deposit_id: String,
        job_id: String,
        job_class: String,
    },
    JobFinished {
        deposit_id: String,
        job_id: String,
        job_class: String,
        /// "completed", "failed" or "interrupted"
        outcome: String,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A message was acknowledged without being processed.
    MessageDropped {
        /// "operation" or "job"
        channel: String,
        deposit_id: Option<String>,
        reason: String,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::PipelineStateChanged { .. } => "pipeline_state_changed",
            Self::DepositRegistered { .. } => "deposit_registered",
            Self::DepositStateChanged { .. } => "deposit_state_changed",
            Self::DepositDestroyed { .. } => "deposit_destroyed",
            Self::DepositResultsSent { .. } => "deposit_results_sent",
            Self::DepositCompleted { .. } => "deposit_completed",
            Self::JobStarted { .. } => "job_started",
            Self::JobFinished { .. } => "job_finished",
            Self::MessageDropped { .. } => "message_dropped",
        }
    }

    /// Returns the deposit this event concerns, if any
    pub fn deposit_id(&self) -> Option<&str> {
        match self {
            Self::DepositRegistered { deposit_id, .. }
            | Self::DepositStateChanged { deposit_id, .. }
            | Self::DepositDestroyed { deposit_id, .. }
            | Self::DepositResultsSent { deposit_id, .. }
            | Self::DepositCompleted { deposit_id, .. }
            | Self::JobStarted { deposit_id, .. }
            | Self::JobFinished { deposit_id, .. } => Some(deposit_id),
            Self::MessageDropped { deposit_id, .. } => deposit_id.as_deref(),
            _ => None,
        }
    }

    /// Returns the user who caused this event, if known
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::DepositRegistered { registered_by, .. } => registered_by.as_deref(),
            Self::DepositDestroyed { destroyed_by, .. } => destroyed_by.as_deref(),
            Self::DepositStateChanged { user_id, .. }
            | Self::PipelineStateChanged { user_id, .. } => user_id.as_deref(),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub deposit_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.deposit_id(), None);
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_event_type_deposit_state_changed() {
        let event = AuditEvent::DepositStateChanged {
            deposit_id: "d-123".to_string(),
            from_state: "running".to_string(),
            to_state: "paused".to_string(),
            reason: Some("pause".to_string()),
            user_id: Some("curator".to_string()),
        };
        assert_eq!(event.event_type(), "deposit_state_changed");
        assert_eq!(event.deposit_id(), Some("d-123"));
        assert_eq!(event.user_id(), Some("curator"));
    }

    #[test]
    fn test_event_type_pipeline_state_changed() {
        let event = AuditEvent::PipelineStateChanged {
            from_state: Some("active".to_string()),
            to_state: "quieted".to_string(),
            user_id: Some("admin".to_string()),
        };
        assert_eq!(event.event_type(), "pipeline_state_changed");
        assert_eq!(event.deposit_id(), None);
        assert_eq!(event.user_id(), Some("admin"));
    }

    #[test]
    fn test_message_dropped_without_deposit() {
        let event = AuditEvent::MessageDropped {
            channel: "operation".to_string(),
            deposit_id: None,
            reason: "malformed".to_string(),
        };
        assert_eq!(event.deposit_id(), None);
    }

    #[test]
    fn test_serialize_deserialize_job_finished() {
        let event = AuditEvent::JobFinished {
            deposit_id: "d-1".to_string(),
            job_id: "j-1".to_string(),
            job_class: "ParseBagJob".to_string(),
            outcome: "failed".to_string(),
            duration_ms: 1200,
            error: Some("bad manifest".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"job_finished\""));
        assert!(json.contains("\"job_class\":\"ParseBagJob\""));

        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "job_finished");
        assert_eq!(deserialized.deposit_id(), Some("d-1"));
    }

    #[test]
    fn test_registered_omits_empty_fields() {
        let event = AuditEvent::DepositRegistered {
            deposit_id: "d-1".to_string(),
            registered_by: None,
            fields: Vec::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("fields"));
    }

    #[test]
    fn test_audit_record_serialize() {
        let record = AuditRecord {
            id: 1,
            timestamp: Utc::now(),
            event_type: "service_started".to_string(),
            deposit_id: None,
            user_id: None,
            data: AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"event_type\":\"service_started\""));
    }
}
