//! Read-mostly business/queue configuration store.
//!
//! Stands in for the external configuration service at the interface
//! boundary: seeded from a JSON bootstrap file at startup, mutated only by
//! the business-scoped upsert endpoint. The ticket engine treats it as
//! read-only.

use std::path::Path;

use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::session::Principal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub max_size: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub avg_service_time_minutes: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Startup bootstrap file: businesses, queues and the bearer-token table the
/// session gateway is seeded with.
#[derive(Debug, Default, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub businesses: Vec<Business>,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    #[serde(default)]
    pub principals: Vec<PrincipalEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PrincipalEntry {
    pub token: String,
    #[serde(flatten)]
    pub principal: Principal,
}

impl BootstrapConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading bootstrap config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing bootstrap config {}", path.display()))
    }
}

pub struct QueueRegistry {
    businesses: DashMap<String, Business>,
    queues: DashMap<String, QueueConfig>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            businesses: DashMap::new(),
            queues: DashMap::new(),
        }
    }

    pub fn from_bootstrap(config: &BootstrapConfig) -> Self {
        let registry = Self::new();
        for business in &config.businesses {
            registry.upsert_business(business.clone());
        }
        for queue in &config.queues {
            registry.upsert_queue(queue.clone());
        }
        registry
    }

    pub fn upsert_business(&self, business: Business) {
        self.businesses.insert(business.id.clone(), business);
    }

    pub fn upsert_queue(&self, queue: QueueConfig) {
        self.queues.insert(queue.id.clone(), queue);
    }

    pub fn business(&self, id: &str) -> Option<Business> {
        self.businesses.get(id).map(|b| b.clone())
    }

    pub fn queue(&self, id: &str) -> Option<QueueConfig> {
        self.queues.get(id).map(|q| q.clone())
    }

    pub fn queues_for_business(&self, business_id: &str) -> Vec<QueueConfig> {
        let mut queues: Vec<QueueConfig> = self
            .queues
            .iter()
            .filter(|q| q.business_id == business_id)
            .map(|q| q.clone())
            .collect();
        queues.sort_by(|a, b| a.id.cmp(&b.id));
        queues
    }

    /// Queues the periodic sweep republishes summaries for.
    pub fn active_queues(&self) -> Vec<QueueConfig> {
        self.queues
            .iter()
            .filter(|q| q.is_active)
            .map(|q| q.clone())
            .collect()
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}
