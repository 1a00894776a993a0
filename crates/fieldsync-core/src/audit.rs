//! Access auditing collaborator.
//!
//! The sync path reports record access through [`AuditSink`]. Sinks are
//! fire-and-forget: they return nothing and must not block.

use crate::models::{Classification, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Read,
    Write,
    Delete,
    Sync,
}

impl AuditAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent<'a> {
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub classification: Classification,
    pub detail: &'a str,
    pub success: bool,
}

impl<'a> AuditEvent<'a> {
    pub const fn new(action: AuditAction, entity_type: EntityType, detail: &'a str) -> Self {
        Self {
            action,
            entity_type,
            classification: entity_type.classification(),
            detail,
            success: true,
        }
    }

    #[must_use]
    pub const fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record_access(&self, event: &AuditEvent<'_>);
}

/// Emits audit events on the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_access(&self, event: &AuditEvent<'_>) {
        tracing::info!(
            target: "audit",
            action = event.action.as_str(),
            entity_type = event.entity_type.as_str(),
            classification = event.classification.as_str(),
            success = event.success,
            detail = event.detail,
            "record access"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(AuditAction, bool)>>);

    impl AuditSink for Collect {
        fn record_access(&self, event: &AuditEvent<'_>) {
            self.0.lock().unwrap().push((event.action, event.success));
        }
    }

    #[test]
    fn event_takes_classification_from_entity_type() {
        let event = AuditEvent::new(AuditAction::Read, EntityType::Customer, "cust_1");
        assert_eq!(event.classification, EntityType::Customer.classification());
        assert!(event.success);
    }

    #[test]
    fn failed_events_are_reported_as_such() {
        let sink = Collect::default();
        sink.record_access(&AuditEvent::new(AuditAction::Write, EntityType::Job, "job_1").failed());
        TracingAuditSink.record_access(&AuditEvent::new(AuditAction::Sync, EntityType::Job, ""));
        assert_eq!(*sink.0.lock().unwrap(), vec![(AuditAction::Write, false)]);
    }
}
