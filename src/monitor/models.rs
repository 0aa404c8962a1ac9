use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub id: ResourceId,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub time: DateTime<Utc>,
}

impl RequestMeta {
    pub fn get_request(id: impl Into<ResourceId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: "GET".to_string(),
            headers: Headers::new(),
            resource_type: None,
            time: Utc::now(),
        }
    }
}

/// Transfer stage reported with a response notification. Only `End` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStage {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub id: ResourceId,
    pub url: String,
    pub status: Option<u16>,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_size: Option<i64>,
    pub stage: TransferStage,
    pub time: DateTime<Utc>,
}

impl ResponseMeta {
    pub fn new(id: impl Into<ResourceId>, url: impl Into<String>, stage: TransferStage) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            status: None,
            status_text: String::new(),
            headers: Headers::new(),
            content_type: None,
            body_size: None,
            stage,
            time: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16, status_text: impl Into<String>) -> Self {
        self.status = Some(status);
        self.status_text = status_text.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceError {
    pub id: ResourceId,
    pub url: String,
    pub error_code: i64,
    pub error_string: String,
}

impl ResourceError {
    /// Code recorded for requests aborted by the private-network policy.
    pub const BLOCKED_CODE: i64 = 999;
    /// Code recorded for resources that outlived the per-resource timeout.
    pub const TIMEOUT_CODE: i64 = 408;
    /// Transfer canceled by the engine.
    pub const CANCELED_CODE: i64 = 5;
    /// Any other engine-reported failure.
    pub const ENGINE_CODE: i64 = 99;

    pub fn new(
        id: impl Into<ResourceId>,
        url: impl Into<String>,
        error_code: i64,
        error_string: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            error_code,
            error_string: error_string.into(),
        }
    }

    pub fn blocked(id: impl Into<ResourceId>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            url,
            Self::BLOCKED_CODE,
            "Blocked: destination is inside a private network",
        )
    }

    pub fn timed_out(id: impl Into<ResourceId>, url: impl Into<String>) -> Self {
        Self::new(id, url, Self::TIMEOUT_CODE, "Network timeout on resource.")
    }

    pub fn is_blocked(&self) -> bool {
        self.error_code == Self::BLOCKED_CODE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceState {
    Pending,
    Completed(ResponseMeta),
    Failed(ResourceError),
}

impl ResourceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub request: RequestMeta,
    pub state: ResourceState,
    pub started_at: Instant,
}

impl ResourceRecord {
    pub fn response(&self) -> Option<&ResponseMeta> {
        match &self.state {
            ResourceState::Completed(response) => Some(response),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ResourceError> {
        match &self.state {
            ResourceState::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ResourceState::Pending)
    }
}

impl Serialize for ResourceRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("ResourceRecord", 3)?;
        record.serialize_field("request", &self.request)?;
        record.serialize_field("response", &self.response())?;
        record.serialize_field("error", &self.error())?;
        record.end()
    }
}
