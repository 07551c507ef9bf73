use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::automation::order::OrderRequest;
use crate::queue::job::JobState;
use crate::utils::error::WorkerError;

/// Inbound request envelope from the message bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub pattern: String,
    pub payload: JobPayload,

    /// Reply list suffix the response is pushed to; absent for
    /// fire-and-forget submissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// Request payload, persisted verbatim as job data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub job_id: String,

    #[serde(default)]
    pub job_type: String,

    pub store: String,

    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Outbound response envelope.
///
/// Internal errors never cross the bus boundary as anything but this
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_empty() -> Self {
        Self {
            status: ResponseStatus::Success,
            data: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Cutoff carried by the sold-out patterns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldoutData {
    /// Last-run timestamp; rows at or before it are ignored. Defaults to
    /// 24 hours before the job starts.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrdersData {
    pub orders: Vec<OrderRequest>,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJobsData {
    pub state: JobState,

    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRefData {
    pub id: String,
}

/// The closed set of requests the worker understands, one variant per
/// pattern.
///
/// Each variant owns its required-field contract; a payload that does not
/// deserialize is answered with an error response, never a panic.
#[derive(Debug, Clone)]
pub enum Request {
    /// Drop every stored catalog record
    ClearProducts,

    /// Crawl sold-out notices and delete the listings they name
    DeleteProducts(SoldoutData),

    /// Crawl sold-out notices and return the distinct product codes
    CrawlSoldoutProducts(SoldoutData),

    /// Crawl the registered-product catalog into the sink
    CrawlRegisteredProducts,

    /// Place purchase orders
    PlaceOrders(PlaceOrdersData),

    /// Extract delivery/waybill rows
    ExtractDeliveries,

    /// Push pending products to the sales channel
    RegisterProducts,

    /// Queue introspection
    QueueStatus,
    QueueJobs(QueueJobsData),
    RemoveQueueJob(JobRefData),
    RetryQueueJob(JobRefData),
}

impl Request {
    /// Parse a pattern and its data into a typed request
    pub fn parse(pattern: &str, data: &Value) -> Result<Self, WorkerError> {
        let invalid = |e: serde_json::Error| WorkerError::InvalidPayload {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };

        // Scheduled submissions carry no data at all
        let soldout_data = |data: &Value| -> Result<SoldoutData, WorkerError> {
            if data.is_null() {
                Ok(SoldoutData::default())
            } else {
                serde_json::from_value(data.clone()).map_err(invalid)
            }
        };

        match pattern {
            "clearOnchProducts" => Ok(Request::ClearProducts),
            "deleteOnchProducts" => Ok(Request::DeleteProducts(soldout_data(data)?)),
            "crawlOnchSoldoutProducts" => Ok(Request::CrawlSoldoutProducts(soldout_data(data)?)),
            "crawlOnchRegisteredProducts" => Ok(Request::CrawlRegisteredProducts),
            "placeOnchOrders" => Ok(Request::PlaceOrders(
                serde_json::from_value(data.clone()).map_err(invalid)?,
            )),
            "extractOnchDeliveries" => Ok(Request::ExtractDeliveries),
            "registerOnchProducts" => Ok(Request::RegisterProducts),
            "queueStatus" => Ok(Request::QueueStatus),
            "queueJobs" => Ok(Request::QueueJobs(
                serde_json::from_value(data.clone()).map_err(invalid)?,
            )),
            "removeQueueJob" => Ok(Request::RemoveQueueJob(
                serde_json::from_value(data.clone()).map_err(invalid)?,
            )),
            "retryQueueJob" => Ok(Request::RetryQueueJob(
                serde_json::from_value(data.clone()).map_err(invalid)?,
            )),
            unknown => Err(WorkerError::UnknownPattern(unknown.to_string())),
        }
    }

    /// Human-readable task label for dispatch logging
    pub fn label(&self) -> &'static str {
        match self {
            Request::ClearProducts => "clear stored products",
            Request::DeleteProducts(_) => "delete sold-out listings",
            Request::CrawlSoldoutProducts(_) => "crawl sold-out products",
            Request::CrawlRegisteredProducts => "crawl registered products",
            Request::PlaceOrders(_) => "place purchase orders",
            Request::ExtractDeliveries => "extract deliveries",
            Request::RegisterProducts => "register products to channel",
            Request::QueueStatus => "queue status counts",
            Request::QueueJobs(_) => "list queue jobs",
            Request::RemoveQueueJob(_) => "remove queue job",
            Request::RetryQueueJob(_) => "retry queue job",
        }
    }

    /// Whether this request is long-running work fired through the queue
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            Request::DeleteProducts(_)
                | Request::CrawlSoldoutProducts(_)
                | Request::CrawlRegisteredProducts
                | Request::PlaceOrders(_)
                | Request::ExtractDeliveries
                | Request::RegisterProducts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_with_camel_case_keys() {
        let raw = json!({
            "pattern": "crawlOnchSoldoutProducts",
            "payload": {
                "jobId": "j1",
                "jobType": "crawl",
                "store": "s1",
                "data": { "since": "2026-08-01T00:00:00Z" }
            }
        });

        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.payload.job_id, "j1");
        assert_eq!(envelope.payload.store, "s1");

        let request = Request::parse(&envelope.pattern, &envelope.payload.data).unwrap();
        assert!(matches!(request, Request::CrawlSoldoutProducts(_)));
        assert!(request.is_queued());
    }

    #[test]
    fn unknown_pattern_is_a_typed_error() {
        let err = Request::parse("fooBar", &json!({})).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownPattern(_)));
    }

    #[test]
    fn introspection_patterns_are_direct() {
        let request = Request::parse("queueStatus", &json!({})).unwrap();
        assert!(!request.is_queued());
    }

    #[test]
    fn soldout_patterns_accept_a_null_payload() {
        let request = Request::parse("crawlOnchSoldoutProducts", &Value::Null).unwrap();
        assert!(matches!(
            request,
            Request::CrawlSoldoutProducts(SoldoutData { since: None })
        ));
    }

    #[test]
    fn malformed_order_payload_is_rejected() {
        let err = Request::parse("placeOnchOrders", &json!({ "orders": "not-a-list" }));
        assert!(err.is_err());
    }

    #[test]
    fn error_response_serializes_without_data() {
        let response = Response::error("unrecognized pattern 'x'");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({ "status": "error", "message": "unrecognized pattern 'x'" }));
    }
}
