//! Session/presence gateway: bearer-credential resolution and subscription
//! authorization.
//!
//! Identity verification proper is an external concern; this gateway holds
//! the resolved-token table it would be backed by and enforces which topics
//! a principal may watch.

use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::protocol::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Customer,
    Business,
}

/// Resolved identity attached to a request or realtime connection.
#[derive(Debug, Clone, Deserialize)]
pub struct Principal {
    pub id: String,
    pub kind: PrincipalKind,
    #[serde(default)]
    pub business_id: Option<String>,
}

impl Principal {
    pub fn customer(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PrincipalKind::Customer,
            business_id: None,
        }
    }

    pub fn business(id: impl Into<String>, business_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PrincipalKind::Business,
            business_id: Some(business_id.into()),
        }
    }

    /// True when this principal operates the given business.
    #[inline]
    pub fn operates(&self, business_id: &str) -> bool {
        self.kind == PrincipalKind::Business
            && self.business_id.as_deref() == Some(business_id)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or invalid credentials")]
    Unauthenticated,
}

pub struct SessionGateway {
    principals: DashMap<String, Principal>,
}

impl SessionGateway {
    pub fn new() -> Self {
        Self {
            principals: DashMap::new(),
        }
    }

    pub fn register_token(&self, token: impl Into<String>, principal: Principal) {
        self.principals.insert(token.into(), principal);
    }

    /// Resolve a bearer credential to a principal.
    pub fn resolve(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        self.principals
            .get(token)
            .map(|p| p.clone())
            .ok_or(AuthError::Unauthenticated)
    }

    /// Whether a principal may subscribe to a topic. Customers see their own
    /// channel and any queue's aggregate channel; business principals
    /// additionally see their business channel and their queues.
    pub fn authorizes(&self, principal: &Principal, topic: &Topic) -> bool {
        match topic {
            Topic::Customer(id) => {
                principal.kind == PrincipalKind::Customer && principal.id == *id
            }
            Topic::Business(id) => principal.operates(id),
            Topic::Queue(_) => true,
        }
    }

    pub fn token_count(&self) -> usize {
        self.principals.len()
    }
}

impl Default for SessionGateway {
    fn default() -> Self {
        Self::new()
    }
}
