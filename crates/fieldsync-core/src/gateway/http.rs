//! REST client for the field-operations backend.
//!
//! Collections live at `{base}/{collection}` and records at
//! `{base}/{collection}/{id}`. Records travel as flat JSON objects carrying
//! `id` and `updated_at` next to the entity fields.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{ListFilter, RemoteError, RemoteGateway, RemoteResult};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{EntityData, EntityId, EntityType, Record};
use crate::util::{compact_text, http_base_url, normalize_text_option, unix_millis_now};

const PROBE_PATH: &str = "health";

/// HTTP implementation of [`RemoteGateway`]
#[derive(Clone)]
pub struct HttpRemoteGateway {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteGateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteGateway")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteGateway {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into()).map_err(Error::Config)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    /// Build a gateway from engine config; `None` in local-only mode.
    pub fn from_config(config: &EngineConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.api_base_url.clone() else {
            return Ok(None);
        };
        Self::new(base_url, config.api_token.clone(), config.request_timeout()).map(Some)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, entity_type: EntityType) -> String {
        format!("{}/{}", self.base_url, entity_type.collection())
    }

    fn record_url(&self, entity_type: EntityType, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(entity_type),
            urlencoding::encode(id)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| RemoteError::NetworkUnavailable(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn read_record(entity_type: EntityType, response: Response) -> RemoteResult<Record> {
        let wire = response
            .json::<WireRecord>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(error.to_string()))?;
        wire.into_record(entity_type)
    }

    fn body(data: &EntityData) -> RemoteResult<serde_json::Value> {
        data.to_fields()
            .map_err(|error| RemoteError::InvalidResponse(format!("unserializable payload: {error}")))
    }
}

impl RemoteGateway for HttpRemoteGateway {
    async fn create(&self, entity_type: EntityType, data: &EntityData) -> RemoteResult<Record> {
        let body = Self::body(data)?;
        let response = self
            .send(self.client.post(self.collection_url(entity_type)).json(&body))
            .await?;
        Self::read_record(entity_type, response).await
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        data: &EntityData,
    ) -> RemoteResult<Record> {
        let body = Self::body(data)?;
        let response = self
            .send(self.client.put(self.record_url(entity_type, id)).json(&body))
            .await?;
        Self::read_record(entity_type, response).await
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> RemoteResult<()> {
        self.send(self.client.delete(self.record_url(entity_type, id)))
            .await?;
        Ok(())
    }

    async fn list(&self, entity_type: EntityType, filter: &ListFilter) -> RemoteResult<Vec<Record>> {
        let request = self
            .client
            .get(self.collection_url(entity_type))
            .query(&filter.query_pairs());
        let response = self.send(request).await?;
        let payload = response
            .json::<ListResponse>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(error.to_string()))?;

        payload
            .into_items()
            .into_iter()
            .map(|wire| wire.into_record(entity_type))
            .collect()
    }

    async fn probe(&self) -> RemoteResult<()> {
        self.send(self.client.get(format!("{}/{PROBE_PATH}", self.base_url)))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    id: String,
    #[serde(default)]
    updated_at: Option<i64>,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

impl WireRecord {
    fn into_record(self, entity_type: EntityType) -> RemoteResult<Record> {
        let id = normalize_text_option(Some(self.id)).ok_or_else(|| {
            RemoteError::InvalidResponse("record did not include an id".to_string())
        })?;
        let data = EntityData::from_fields(entity_type, serde_json::Value::Object(self.fields))
            .map_err(|error| {
                RemoteError::InvalidResponse(format!("invalid {entity_type} fields: {error}"))
            })?;
        Ok(Record::new(
            EntityId::permanent(id),
            self.updated_at.unwrap_or_else(unix_millis_now),
            data,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Bare(Vec<WireRecord>),
    Wrapped { data: Vec<WireRecord> },
}

impl ListResponse {
    fn into_items(self) -> Vec<WireRecord> {
        match self {
            Self::Bare(items) | Self::Wrapped { data: items } => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }
    compact_text(body)
}

/// 4xx is a refusal of this request, except timeouts and rate limits, which
/// are retried like server failures.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(body);
    let message = if message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        message
    };

    match status {
        StatusCode::REQUEST_TIMEOUT => RemoteError::NetworkUnavailable(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RemoteUnavailable {
            status: status.as_u16(),
            message,
        },
        status if status.is_client_error() => RemoteError::RemoteRejected {
            status: status.as_u16(),
            message,
        },
        status => RemoteError::RemoteUnavailable {
            status: status.as_u16(),
            message,
        },
    }
}

fn normalize_base_url(raw: String) -> std::result::Result<String, String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| "api base URL must not be empty".to_string())?;
    http_base_url(&base_url)
        .ok_or_else(|| "api base URL must include http:// or https://".to_string())
}
