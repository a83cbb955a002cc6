// src/policy/resolver.rs

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

use super::{Discriminator, Policy, QuotaType, RouteContext};
use crate::config::{PolicyConfig, RateLimitProperties};
use crate::error::{RateLimiterError, Result};

const ANONYMOUS_USER: &str = "anonymous";
const UNKNOWN_ORIGIN: &str = "unknown";
const RESPONSE_TIME_SEGMENT: &str = "quota=response_time";

/// A policy together with the storage key it applies to for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub key: String,
    pub policy: Policy,
}

/// Maps a request onto the ordered list of policies that apply to it.
///
/// Route specific policies replace the defaults; they are not merged.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    enabled: bool,
    key_prefix: String,
    default_policies: Vec<Policy>,
    route_policies: HashMap<String, Vec<Policy>>,
}

impl PolicyResolver {
    /// An enabled resolver with no policies
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            enabled: true,
            key_prefix: key_prefix.into(),
            default_policies: Vec::new(),
            route_policies: HashMap::new(),
        }
    }

    /// Validates configuration and builds the resolver. Any invalid policy
    /// fails the whole load.
    pub fn from_properties(props: &RateLimitProperties) -> Result<Self> {
        let mut resolver = Self::new(props.key_prefix.clone());
        resolver.enabled = props.enabled;

        for config in &props.default_policies {
            for policy in expand(config).map_err(|e| log_invalid("default", e))? {
                resolver = resolver
                    .with_default_policy(policy)
                    .map_err(|e| log_invalid("default", e))?;
            }
        }

        for (route, configs) in &props.policies {
            for config in configs {
                for policy in expand(config).map_err(|e| log_invalid(route, e))? {
                    resolver = resolver
                        .with_route_policy(route.clone(), policy)
                        .map_err(|e| log_invalid(route, e))?;
                }
            }
        }

        debug!(
            routes = resolver.route_policies.len(),
            defaults = resolver.default_policies.len(),
            enabled = resolver.enabled,
            "Policies loaded"
        );
        Ok(resolver)
    }

    pub fn with_default_policy(mut self, policy: Policy) -> Result<Self> {
        ensure_distinct(&self.default_policies, &policy, "default")?;
        self.default_policies.push(policy);
        Ok(self)
    }

    pub fn with_route_policy(mut self, route: impl Into<String>, policy: Policy) -> Result<Self> {
        let route = route.into();
        let policies = self.route_policies.entry(route.clone()).or_default();
        ensure_distinct(policies, &policy, &route)?;
        policies.push(policy);
        Ok(self)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Route ids that carry their own policies
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.route_policies.keys().map(String::as_str)
    }

    /// Policies that govern a route, in declaration order
    pub fn policies_for(&self, route_id: Option<&str>) -> &[Policy] {
        if !self.enabled {
            return &[];
        }
        route_id
            .and_then(|route| self.route_policies.get(route))
            .map(Vec::as_slice)
            .unwrap_or(self.default_policies.as_slice())
    }

    /// Ordered (key, policy) pairs for a request. Empty means the request is
    /// not rate limited at all.
    pub fn resolve(&self, ctx: &RouteContext) -> Vec<ResolvedPolicy> {
        self.policies_for(ctx.route_id.as_deref())
            .iter()
            .map(|policy| ResolvedPolicy {
                key: self.key_for(ctx, policy),
                policy: policy.clone(),
            })
            .collect()
    }

    /// Builds `prefix:route[:kind=value...]` for a request under a policy.
    ///
    /// Every discriminator segment names its kind, and `%`, `:` and `=` in
    /// route ids and values are percent-escaped, so distinct policy shapes
    /// and attribute values never share a key.
    pub fn key_for(&self, ctx: &RouteContext, policy: &Policy) -> String {
        let mut segments: Vec<Cow<'_, str>> = Vec::with_capacity(policy.discriminators().len() + 3);
        if !self.key_prefix.is_empty() {
            segments.push(Cow::Borrowed(&self.key_prefix));
        }
        if let Some(route) = ctx.route_id.as_deref() {
            segments.push(escape(route));
        }

        for discriminator in policy.discriminators() {
            let (kind, value) = match discriminator {
                Discriminator::Url => ("url", Cow::Borrowed(ctx.path.as_str())),
                Discriminator::Origin => (
                    "origin",
                    Cow::Borrowed(ctx.origin.as_deref().unwrap_or(UNKNOWN_ORIGIN)),
                ),
                Discriminator::User => (
                    "user",
                    Cow::Borrowed(ctx.user.as_deref().unwrap_or(ANONYMOUS_USER)),
                ),
                Discriminator::HttpMethod => ("method", Cow::Owned(ctx.method.to_uppercase())),
            };
            segments.push(Cow::Owned(format!("{}={}", kind, escape(&value))));
        }

        if policy.quota_type() == QuotaType::ResponseTime {
            segments.push(Cow::Borrowed(RESPONSE_TIME_SEGMENT));
        }
        segments.join(":")
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(|c| matches!(c, '%' | ':' | '=')) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 6);
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '=' => escaped.push_str("%3D"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// One configured entry may carry both a request limit and a response time
/// quota; each becomes its own policy.
fn expand(config: &PolicyConfig) -> Result<Vec<Policy>> {
    let mut policies = Vec::with_capacity(2);

    if let Some(limit) = config.limit {
        policies.push(Policy::new(
            limit,
            config.refresh_interval,
            QuotaType::Requests,
            config.discriminators.clone(),
        )?);
    }
    if let Some(quota) = config.quota {
        policies.push(Policy::new(
            quota.as_millis() as u64,
            config.refresh_interval,
            QuotaType::ResponseTime,
            config.discriminators.clone(),
        )?);
    }

    if policies.is_empty() {
        return Err(RateLimiterError::InvalidPolicy(
            "policy sets neither limit nor quota".to_string(),
        ));
    }
    Ok(policies)
}

// Two policies with the same shape on one route would count into one key
fn ensure_distinct(existing: &[Policy], candidate: &Policy, scope: &str) -> Result<()> {
    let shape = |p: &Policy| {
        (
            p.quota_type(),
            p.discriminators().iter().copied().collect::<Vec<_>>(),
        )
    };
    let taken: HashSet<_> = existing.iter().map(shape).collect();
    if taken.contains(&shape(candidate)) {
        return Err(RateLimiterError::InvalidPolicy(format!(
            "{} declares two {:?} policies keyed on {:?}",
            scope,
            candidate.quota_type(),
            candidate.discriminators()
        )));
    }
    Ok(())
}

fn log_invalid(scope: &str, err: RateLimiterError) -> RateLimiterError {
    error!(scope = scope, error = %err, "Rejecting rate limit configuration");
    err
}
