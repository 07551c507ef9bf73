use anyhow::{Result, Context};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cli::config::AppConfig;
use crate::browser::session::SessionPool;
use crate::dispatch::bus::{submit_and_wait, BusConsumer};
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::envelope::{JobPayload, RequestEnvelope, ResponseStatus};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::queue::engine::JobQueue;
use crate::server;
use crate::storage::products::ProductStoreFactory;
use crate::tasks::handlers::{register_handlers, TaskContext};

/// Name of the single queue all store jobs run on
const QUEUE_NAME: &str = "onch";

fn load_config(profile: &str) -> Result<AppConfig> {
    if profile == "default" {
        AppConfig::load_default()
    } else {
        AppConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))
    }
}

/// Run the worker until interrupted
pub async fn serve(profile: String) -> Result<()> {
    let config = load_config(&profile)?;

    // Wire the sinks
    let sink = ProductStoreFactory::create(&config.sink).await?;
    let notifier: Arc<dyn Notifier> = if config.notify.enabled {
        Arc::new(WebhookNotifier::new(&config.notify))
    } else {
        Arc::new(LogNotifier)
    };

    // Session pool and work queue
    let pool = SessionPool::new(
        config.webdriver.clone(),
        config.store.clone(),
        config.selectors.login.clone(),
    );
    let queue = JobQueue::new(QUEUE_NAME, config.queue.clone());

    let ctx = Arc::new(TaskContext {
        config: config.clone(),
        pool,
        store: sink.clone(),
        notifier,
    });
    register_handlers(&queue, ctx);
    queue.start();

    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), sink));
    let bus = BusConsumer::new(config.bus.clone(), dispatcher.clone())?;

    spawn_scheduled_requests(&config, &dispatcher);

    // Liveness runs independently of job processing
    let health_addr = config.server.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve_health(&health_addr).await {
            error!("Health server stopped: {:#}", e);
        }
    });

    tokio::select! {
        result = bus.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping queue");
            queue.stop();
        }
    }

    Ok(())
}

/// Fire each configured schedule entry on its period, through the local
/// dispatcher
fn spawn_scheduled_requests(config: &AppConfig, dispatcher: &Arc<Dispatcher>) {
    for entry in config.schedule.clone() {
        let dispatcher = dispatcher.clone();

        info!(
            "Scheduling '{}' for store {} every {} minute(s)",
            entry.pattern, entry.store, entry.every_minutes
        );

        tokio::spawn(async move {
            let period = Duration::from_secs(entry.every_minutes.max(1) * 60);
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; wait one full period instead
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let envelope = RequestEnvelope {
                    pattern: entry.pattern.clone(),
                    payload: JobPayload {
                        job_id: Uuid::new_v4().to_string(),
                        job_type: "scheduled".to_string(),
                        store: entry.store.clone(),
                        data: Value::Null,
                    },
                    reply_to: None,
                };

                let response = dispatcher.dispatch(&envelope).await;
                if response.status == ResponseStatus::Error {
                    warn!(
                        "Scheduled '{}' failed: {}",
                        entry.pattern,
                        response.message.unwrap_or_default()
                    );
                }
            }
        });
    }
}

/// Submit one request over the bus and print the response
pub async fn submit(
    pattern: String,
    data: String,
    store: String,
    job_id: Option<String>,
    profile: String,
    timeout: usize,
) -> Result<()> {
    let config = load_config(&profile)?;

    let data: Value = serde_json::from_str(&data)
        .context("Payload data must be valid JSON")?;
    let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let envelope = RequestEnvelope {
        pattern,
        payload: JobPayload {
            job_id: job_id.clone(),
            job_type: "cli".to_string(),
            store,
            data,
        },
        reply_to: None,
    };

    info!("Submitting job {}", job_id);
    let response = submit_and_wait(&config.bus, envelope, timeout).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}

/// Show queue state counts of a running worker
pub async fn status(profile: String) -> Result<()> {
    let config = load_config(&profile)?;

    let envelope = RequestEnvelope {
        pattern: "queueStatus".to_string(),
        payload: JobPayload {
            job_id: Uuid::new_v4().to_string(),
            job_type: "cli".to_string(),
            store: "onch".to_string(),
            data: Value::Null,
        },
        reply_to: None,
    };

    let response = submit_and_wait(&config.bus, envelope, 10).await?;

    match response.data {
        Some(counts) => {
            println!("Queue status:");
            println!("  waiting:   {}", counts["waiting"]);
            println!("  active:    {}", counts["active"]);
            println!("  delayed:   {}", counts["delayed"]);
            println!("  completed: {}", counts["completed"]);
            println!("  failed:    {}", counts["failed"]);
        }
        None => {
            warn!("Worker answered without data: {:?}", response.message);
        }
    }

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = AppConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    // Load the profile if it exists
    match AppConfig::load_profile(&profile_name) {
        Ok(config) => {
            // Display the configuration
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            // Profile doesn't exist, create a new one
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = AppConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the default configuration
pub async fn show_config() -> Result<()> {
    let config = AppConfig::load_default()?;
    println!("{:#?}", config);

    Ok(())
}
