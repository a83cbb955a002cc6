// src/policy/mod.rs

//! Rate limit policies and the request attributes they are keyed on.

mod resolver;

pub use resolver::{PolicyResolver, ResolvedPolicy};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Dimension a policy measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    /// Number of admitted requests per window
    Requests,
    /// Summed upstream response time per window, in milliseconds
    ResponseTime,
}

/// Request attribute appended to a rate limit key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discriminator {
    /// Request path
    Url,
    /// Client address as seen by the gateway
    Origin,
    /// Authenticated user, `anonymous` when absent
    User,
    /// HTTP method, upper-cased
    HttpMethod,
}

/// Immutable rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    limit: u64,
    refresh_interval: Duration,
    quota_type: QuotaType,
    discriminators: Vec<Discriminator>,
}

impl Policy {
    /// Builds a policy, rejecting a zero refresh interval
    pub fn new(
        limit: u64,
        refresh_interval: Duration,
        quota_type: QuotaType,
        discriminators: Vec<Discriminator>,
    ) -> Result<Self> {
        if refresh_interval.as_millis() == 0 {
            return Err(RateLimiterError::InvalidPolicy(format!(
                "refresh interval must be at least 1ms, got {:?}",
                refresh_interval
            )));
        }

        Ok(Self {
            limit,
            refresh_interval,
            quota_type,
            discriminators,
        })
    }

    /// Shorthand for a request-count policy
    pub fn requests(
        limit: u64,
        refresh_interval: Duration,
        discriminators: Vec<Discriminator>,
    ) -> Result<Self> {
        Self::new(limit, refresh_interval, QuotaType::Requests, discriminators)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn quota_type(&self) -> QuotaType {
        self.quota_type
    }

    pub fn discriminators(&self) -> &[Discriminator] {
        &self.discriminators
    }
}

/// Attributes of an incoming request, extracted upstream by the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteContext {
    pub route_id: Option<String>,
    pub path: String,
    pub method: String,
    pub origin: Option<String>,
    pub user: Option<String>,
}

impl RouteContext {
    pub fn new(route_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            route_id: Some(route_id.into()),
            path: path.into(),
            method: "GET".to_string(),
            origin: None,
            user: None,
        }
    }

    /// Request that matched no gateway route
    pub fn unrouted(path: impl Into<String>) -> Self {
        Self {
            route_id: None,
            path: path.into(),
            method: "GET".to_string(),
            origin: None,
            user: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}
