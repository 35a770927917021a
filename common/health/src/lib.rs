use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::warn;

/// Liveness reporting for the background loops of a service.
///
/// A process can only be trusted with events while its asynchronous loops
/// are actually turning. Each loop registers a component here and must
/// report healthy more often than its deadline; a component that stops
/// reporting is marked stalled and fails the overall check. The registry
/// status is served on a liveness probe route.

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when the component registers, before its first report.
    Starting,
    /// Healthy as long as the deadline is in the future.
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy by the component itself.
    Unhealthy,
    /// Deadline passed without a report.
    Stalled,
}

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True iff every registered component is currently healthy.
    pub healthy: bool,
    /// Last known status per component, for display.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

/// Held by a component to report its own status.
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy until the deadline. Must be called more frequently
    /// than the deadline configured at registration.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    // Poisoned lock: the probe will fail and the process restart
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        registry
    }

    /// Registers a component and returns the handle it should use to report.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Overall process status, computed from all registered components.
    /// Usable directly as an axum handler result.
    pub fn get_status(&self) -> HealthStatus {
        let components = self.components.read().expect("poisoned HealthRegistry lock");
        let now = OffsetDateTime::now_utc();

        // A registry with no components yet cannot vouch for anything.
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (name, component) in components.iter() {
            match component {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => {
                    status.components.insert(name.clone(), component.clone());
                }
                ComponentStatus::HealthyUntil(_) => {
                    status.healthy = false;
                    status
                        .components
                        .insert(name.clone(), ComponentStatus::Stalled);
                }
                _ => {
                    status.healthy = false;
                    status.components.insert(name.clone(), component.clone());
                }
            }
        }
        if !status.healthy {
            warn!(
                "{} health check failed: {:?}",
                self.name, status.components
            );
        }
        status
    }
}
