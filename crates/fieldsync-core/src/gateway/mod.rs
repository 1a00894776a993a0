//! Remote gateway: the narrow interface to the backend service.

mod http;

use std::future::Future;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::models::{EntityData, EntityType, Record};

pub use http::HttpRemoteGateway;

/// Errors raised by the remote service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure or timeout; retry later
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    /// 4xx: the payload or business rule was refused; do not retry
    #[error("Remote rejected request: {message} ({status})")]
    RemoteRejected { status: u16, message: String },
    /// 5xx: server-side failure; retry up to the bound
    #[error("Remote unavailable: {message} ({status})")]
    RemoteUnavailable { status: u16, message: String },
    /// A successful response whose body could not be understood
    #[error("Invalid remote response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::RemoteRejected { .. })
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteRejected { status: 404, .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Server-side filters for [`RemoteGateway::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub id: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<String>,
}

impl ListFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub const fn is_unfiltered(&self) -> bool {
        self.id.is_none() && self.status.is_none() && self.owner_id.is_none()
    }

    /// Query-string pairs in a stable order
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::new();
        if let Some(id) = &self.id {
            pairs.push(("id", id.as_str()));
        }
        if let Some(status) = &self.status {
            pairs.push(("status", status.as_str()));
        }
        if let Some(owner_id) = &self.owner_id {
            pairs.push(("owner_id", owner_id.as_str()));
        }
        pairs
    }
}

/// Backend operations used by the reconciliation controller.
///
/// Only permanent ids ever cross this boundary.
pub trait RemoteGateway: Send + Sync {
    /// Create a record; returns it with its server-issued id
    fn create(
        &self,
        entity_type: EntityType,
        data: &EntityData,
    ) -> impl Future<Output = RemoteResult<Record>> + Send;

    /// Replace a record's fields; returns the stored record
    fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        data: &EntityData,
    ) -> impl Future<Output = RemoteResult<Record>> + Send;

    /// Delete a record
    fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Fetch the authoritative collection
    fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> impl Future<Output = RemoteResult<Vec<Record>>> + Send;

    /// Cheap reachability check used while offline
    fn probe(&self) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// Gateway for local-only mode: every call reports the network as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedGateway;

impl DisconnectedGateway {
    fn unavailable<T>() -> RemoteResult<T> {
        Err(RemoteError::NetworkUnavailable(
            "no remote service configured".to_string(),
        ))
    }
}

impl RemoteGateway for DisconnectedGateway {
    async fn create(&self, _entity_type: EntityType, _data: &EntityData) -> RemoteResult<Record> {
        Self::unavailable()
    }

    async fn update(
        &self,
        _entity_type: EntityType,
        _id: &str,
        _data: &EntityData,
    ) -> RemoteResult<Record> {
        Self::unavailable()
    }

    async fn delete(&self, _entity_type: EntityType, _id: &str) -> RemoteResult<()> {
        Self::unavailable()
    }

    async fn list(&self, _entity_type: EntityType, _filter: &ListFilter) -> RemoteResult<Vec<Record>> {
        Self::unavailable()
    }

    async fn probe(&self) -> RemoteResult<()> {
        Self::unavailable()
    }
}

/// Gateway picked from [`EngineConfig`]: HTTP when a base URL is set.
#[derive(Debug)]
pub enum ConfiguredGateway {
    Http(HttpRemoteGateway),
    Disconnected(DisconnectedGateway),
}

impl ConfiguredGateway {
    pub fn from_config(config: &EngineConfig) -> crate::Result<Self> {
        Ok(HttpRemoteGateway::from_config(config)?
            .map_or(Self::Disconnected(DisconnectedGateway), Self::Http))
    }

    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

impl RemoteGateway for ConfiguredGateway {
    async fn create(&self, entity_type: EntityType, data: &EntityData) -> RemoteResult<Record> {
        match self {
            Self::Http(gateway) => gateway.create(entity_type, data).await,
            Self::Disconnected(gateway) => gateway.create(entity_type, data).await,
        }
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        data: &EntityData,
    ) -> RemoteResult<Record> {
        match self {
            Self::Http(gateway) => gateway.update(entity_type, id, data).await,
            Self::Disconnected(gateway) => gateway.update(entity_type, id, data).await,
        }
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> RemoteResult<()> {
        match self {
            Self::Http(gateway) => gateway.delete(entity_type, id).await,
            Self::Disconnected(gateway) => gateway.delete(entity_type, id).await,
        }
    }

    async fn list(&self, entity_type: EntityType, filter: &ListFilter) -> RemoteResult<Vec<Record>> {
        match self {
            Self::Http(gateway) => gateway.list(entity_type, filter).await,
            Self::Disconnected(gateway) => gateway.list(entity_type, filter).await,
        }
    }

    async fn probe(&self) -> RemoteResult<()> {
        match self {
            Self::Http(gateway) => gateway.probe().await,
            Self::Disconnected(gateway) => gateway.probe().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_errors_are_not_retryable() {
        let rejected = RemoteError::RemoteRejected {
            status: 422,
            message: "name is required".to_string(),
        };
        assert!(!rejected.is_retryable());
        assert!(RemoteError::NetworkUnavailable("timeout".to_string()).is_retryable());
        assert!(RemoteError::RemoteUnavailable {
            status: 503,
            message: "maintenance".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn not_found_is_detected() {
        let missing = RemoteError::RemoteRejected {
            status: 404,
            message: "gone".to_string(),
        };
        assert!(missing.is_not_found());
    }

    #[test]
    fn list_filter_query_pairs_are_ordered() {
        let filter = ListFilter {
            status: Some("active".to_string()),
            owner_id: Some("cust_1".to_string()),
            ..ListFilter::by_id("job_1")
        };
        assert_eq!(
            filter.query_pairs(),
            vec![("id", "job_1"), ("status", "active"), ("owner_id", "cust_1")]
        );
        assert!(ListFilter::default().is_unfiltered());
    }

    #[test]
    fn configured_gateway_follows_base_url() {
        let local = ConfiguredGateway::from_config(&EngineConfig::default()).unwrap();
        assert!(!local.is_connected());

        let remote = ConfiguredGateway::from_config(&EngineConfig {
            api_base_url: Some("https://api.example.com".to_string()),
            ..EngineConfig::default()
        })
        .unwrap();
        assert!(remote.is_connected());
    }

    #[tokio::test]
    async fn disconnected_gateway_reports_network_unavailable() {
        let gateway = ConfiguredGateway::Disconnected(DisconnectedGateway);
        assert!(matches!(
            gateway.probe().await,
            Err(RemoteError::NetworkUnavailable(_))
        ));
    }
}
