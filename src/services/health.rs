//! Health reporting for liveness and readiness probes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::coordinator::OrderSystem;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEntities {
    pub workflows: usize,
    pub orders: usize,
    pub positions: usize,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub live_entities: LiveEntities,
}

pub struct HealthState {
    pub started_at: DateTime<Utc>,
    system: Arc<OrderSystem>,
}

impl HealthState {
    pub fn new(system: Arc<OrderSystem>) -> Self {
        Self {
            started_at: Utc::now(),
            system,
        }
    }

    pub async fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        // Reads on a stream that never exists exercise the backends
        let persistence = &self.system.persistence;
        let (journal, snapshots) = futures::future::join(
            persistence.journal.latest_sequence("Health", "probe"),
            persistence.snapshots.latest("Health", "probe"),
        )
        .await;

        for (name, error) in [
            ("journal", journal.err()),
            ("snapshots", snapshots.err()),
        ] {
            let status = if error.is_none() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            if status != HealthStatus::Healthy {
                overall_status = status;
            }
            components.push(ComponentHealth {
                name: name.to_string(),
                status,
                message: error.map(|e| e.to_string()),
                last_check: Utc::now(),
            });
        }

        let collaborators_alive = self.system.gateway.is_alive()
            && self.system.source_wallet.is_alive()
            && self.system.exchange_wallet.is_alive();
        let collaborator_status = if collaborators_alive {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        if collaborator_status == HealthStatus::Unhealthy && overall_status == HealthStatus::Healthy {
            overall_status = HealthStatus::Degraded;
        }
        components.push(ComponentHealth {
            name: "collaborators".to_string(),
            status: collaborator_status,
            message: if collaborators_alive {
                None
            } else {
                Some("Wallet or gateway stopped".to_string())
            },
            last_check: Utc::now(),
        });

        HealthResponse {
            status: overall_status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            components,
            live_entities: LiveEntities {
                workflows: self.system.workflows.live_count(),
                orders: self.system.orders.live_count(),
                positions: self.system.positions.live_count(),
            },
        }
    }
}
