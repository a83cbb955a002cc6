use dotenv::dotenv;
use gateway_ratelimit::{init_logging, PolicyResolver, RateLimitProperties, RateLimiterError};
use std::process::ExitCode;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "ratelimit.json";

// Loads and validates the policy file so a gateway refuses to start with
// limits it would enforce wrongly.
fn main() -> ExitCode {
    dotenv().ok();
    init_logging();

    let path = std::env::var("RATE_LIMIT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    info!(path = path.as_str(), "Loading rate limit policies");

    let props = match RateLimitProperties::from_file(&path) {
        Ok(props) => props,
        Err(e) => {
            error!(path = path.as_str(), error = %e, "Could not read rate limit configuration");
            return ExitCode::FAILURE;
        }
    };

    let resolver = match PolicyResolver::from_properties(&props) {
        Ok(resolver) => resolver,
        Err(e @ RateLimiterError::InvalidPolicy(_)) => {
            error!(error = %e, "Refusing to start with invalid policies");
            return ExitCode::from(2);
        }
        Err(e) => {
            error!(error = %e, "Policy loading failed");
            return ExitCode::FAILURE;
        }
    };

    if !props.enabled {
        warn!("Rate limiting is disabled, no request will be limited");
    }

    let mut routes: Vec<&str> = resolver.routes().collect();
    routes.sort_unstable();
    for route in routes {
        for policy in resolver.policies_for(Some(route)) {
            info!(
                route = route,
                quota_type = ?policy.quota_type(),
                limit = policy.limit(),
                refresh_ms = policy.refresh_interval().as_millis() as u64,
                discriminators = ?policy.discriminators(),
                "Route policy"
            );
        }
    }
    for policy in resolver.policies_for(None) {
        info!(
            quota_type = ?policy.quota_type(),
            limit = policy.limit(),
            refresh_ms = policy.refresh_interval().as_millis() as u64,
            discriminators = ?policy.discriminators(),
            "Default policy"
        );
    }

    info!(
        key_prefix = resolver.key_prefix(),
        fail_mode = ?props.limiter.fail_mode,
        timeout_ms = props.limiter.timeout.as_millis() as u64,
        "Rate limit configuration valid"
    );
    ExitCode::SUCCESS
}
