use anyhow::{Result, anyhow};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::dispatch::envelope::{Request, RequestEnvelope, Response};
use crate::queue::engine::JobQueue;
use crate::queue::job::JobState;
use crate::storage::products::ProductStore;

/// Maps inbound requests to queue submissions or direct handlers.
///
/// Always answers with a response envelope; internal failures never cross
/// the bus boundary as anything else.
pub struct Dispatcher {
    queue: JobQueue,
    store: Arc<dyn ProductStore>,
}

impl Dispatcher {
    pub fn new(queue: JobQueue, store: Arc<dyn ProductStore>) -> Self {
        Self { queue, store }
    }

    pub async fn dispatch(&self, envelope: &RequestEnvelope) -> Response {
        let request = match Request::parse(&envelope.pattern, &envelope.payload.data) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected request for job {}: {}", envelope.payload.job_id, e);
                return Response::error(e.to_string());
            }
        };

        info!(
            "Dispatching '{}' ({}) for job {}",
            envelope.pattern,
            request.label(),
            envelope.payload.job_id
        );

        if request.is_queued() {
            return self.run_queued(envelope).await;
        }

        match self.run_direct(request).await {
            Ok(response) => response,
            Err(e) => Response::error(format!("{:#}", e)),
        }
    }

    /// Submit long-running work to the queue and await its terminal result
    async fn run_queued(&self, envelope: &RequestEnvelope) -> Response {
        let payload = match serde_json::to_value(&envelope.payload) {
            Ok(payload) => payload,
            Err(e) => return Response::error(format!("failed to serialize payload: {}", e)),
        };

        let job = self.queue.enqueue(&envelope.pattern, payload).await;

        match self.queue.wait_for(&job.id).await {
            Ok(done) if done.state == JobState::Completed => {
                Response::success(done.result.unwrap_or(Value::Null))
            }
            Ok(done) => Response::error(
                done.error
                    .unwrap_or_else(|| format!("job {} failed", done.id)),
            ),
            Err(e) => Response::error(format!("{:#}", e)),
        }
    }

    async fn run_direct(&self, request: Request) -> Result<Response> {
        match request {
            Request::ClearProducts => {
                self.store.clear_all().await?;
                Ok(Response::success_empty())
            }
            Request::QueueStatus => {
                let counts = self.queue.counts().await;
                Ok(Response::success(serde_json::to_value(counts)?))
            }
            Request::QueueJobs(data) => {
                let jobs = self.queue.list_by_state(data.state, data.limit).await;
                Ok(Response::success(serde_json::to_value(jobs)?))
            }
            Request::RemoveQueueJob(data) => {
                if self.queue.remove(&data.id).await {
                    Ok(Response::success_empty())
                } else {
                    Ok(Response::error(format!("unknown job id '{}'", data.id)))
                }
            }
            Request::RetryQueueJob(data) => {
                self.queue.retry(&data.id).await?;
                Ok(Response::success_empty())
            }
            queued => Err(anyhow!(
                "pattern '{}' must go through the queue",
                queued.label()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use crate::cli::config::QueueSettings;
    use crate::dispatch::envelope::{JobPayload, ResponseStatus};
    use crate::queue::engine::JobHandler;
    use crate::queue::job::Job;
    use crate::scrape::pagination::PageChunk;
    use crate::scrape::soldout::SoldoutRow;
    use crate::storage::products::MockProductStore;
    use crate::tasks::handlers::crawl_soldout_flow;

    fn queue() -> JobQueue {
        JobQueue::new(
            "onch",
            QueueSettings {
                concurrency: 1,
                max_attempts: 3,
                backoff_ms: 1,
                retention_age_secs: 3600,
                retention_count: 100,
            },
        )
    }

    fn envelope(pattern: &str, data: Value) -> RequestEnvelope {
        RequestEnvelope {
            pattern: pattern.to_string(),
            payload: JobPayload {
                job_id: "j1".to_string(),
                job_type: "test".to_string(),
                store: "s1".to_string(),
                data,
            },
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn unknown_pattern_yields_an_error_response() {
        let dispatcher = Dispatcher::new(queue(), Arc::new(MockProductStore::new()));

        let response = dispatcher.dispatch(&envelope("noSuchPattern", json!({}))).await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response
            .message
            .as_deref()
            .unwrap()
            .contains("unrecognized pattern"));
    }

    #[tokio::test]
    async fn clear_products_is_handled_directly() {
        let mut store = MockProductStore::new();
        store.expect_clear_all().times(1).returning(|| Ok(()));

        let dispatcher = Dispatcher::new(queue(), Arc::new(store));
        let response = dispatcher.dispatch(&envelope("clearOnchProducts", json!({}))).await;

        assert_eq!(response.status, ResponseStatus::Success);
    }

    #[tokio::test]
    async fn queue_status_reports_counts() {
        let dispatcher = Dispatcher::new(queue(), Arc::new(MockProductStore::new()));

        let response = dispatcher.dispatch(&envelope("queueStatus", json!({}))).await;

        assert_eq!(response.status, ResponseStatus::Success);
        let counts = response.data.unwrap();
        assert_eq!(counts["waiting"], 0);
        assert_eq!(counts["active"], 0);
    }

    #[tokio::test]
    async fn removing_an_unknown_job_is_an_error_response() {
        let dispatcher = Dispatcher::new(queue(), Arc::new(MockProductStore::new()));

        let response = dispatcher
            .dispatch(&envelope("removeQueueJob", json!({ "id": "missing" })))
            .await;

        assert_eq!(response.status, ResponseStatus::Error);
    }

    /// Soldout crawl over a mocked page source: two codes on page 1, an
    /// empty page 2
    struct MockedSoldoutHandler;

    #[async_trait]
    impl JobHandler for MockedSoldoutHandler {
        async fn run(&self, _job: &Job) -> Result<Value> {
            Ok(crawl_soldout_flow(|page_no| async move {
                let records = match page_no {
                    1 => vec![
                        SoldoutRow {
                            title: "[A1] out of stock".to_string(),
                            code_field: None,
                            raised_at: Utc::now(),
                        },
                        SoldoutRow {
                            title: "[A2] out of stock".to_string(),
                            code_field: None,
                            raised_at: Utc::now(),
                        },
                    ],
                    _ => vec![],
                };
                Ok(PageChunk { records, has_next: true })
            })
            .await)
        }
    }

    #[tokio::test]
    async fn soldout_crawl_round_trips_through_queue_and_dispatcher() {
        let queue = queue();
        queue.register_handler("crawlOnchSoldoutProducts", Arc::new(MockedSoldoutHandler));
        queue.start();

        let dispatcher = Dispatcher::new(queue.clone(), Arc::new(MockProductStore::new()));

        let response = dispatcher
            .dispatch(&envelope("crawlOnchSoldoutProducts", json!({})))
            .await;

        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(
            response.data.unwrap(),
            json!({ "soldoutProductCodes": ["A1", "A2"] })
        );

        // The finished job stays inspectable until pruned
        let counts = queue.counts().await;
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn failed_queued_job_surfaces_its_error() {
        struct AlwaysFailing;

        #[async_trait]
        impl JobHandler for AlwaysFailing {
            async fn run(&self, _job: &Job) -> Result<Value> {
                Err(anyhow!("login to store 's1' failed: bad credentials"))
            }
        }

        let queue = queue();
        queue.register_handler("crawlOnchSoldoutProducts", Arc::new(AlwaysFailing));
        queue.start();

        let dispatcher = Dispatcher::new(queue, Arc::new(MockProductStore::new()));
        let response = dispatcher
            .dispatch(&envelope("crawlOnchSoldoutProducts", json!({})))
            .await;

        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.message.as_deref().unwrap().contains("login"));
    }
}
