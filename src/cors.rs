use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use regex::Regex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;
use url::Url;

use crate::{config::CorsConfig, error::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    Allow,
    Deny,
}

/// Exact allowlist plus an optional hostname pattern.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    pattern: Option<Regex>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>, pattern: Option<Regex>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|o| normalize(&o).to_string())
            .filter(|o| !o.is_empty())
            .collect();
        Self { allowed, pattern }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(
            config.allowed_origins.clone(),
            config.origin_pattern.clone(),
        )
    }

    pub fn decide(&self, origin: Option<&str>) -> OriginDecision {
        let Some(origin) = origin else {
            return OriginDecision::Allow;
        };

        let normalized = normalize(origin);
        if self.allowed.iter().any(|o| o == normalized) {
            return OriginDecision::Allow;
        }

        if let Some(pattern) = &self.pattern {
            let host = Url::parse(origin)
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned));
            if host.is_some_and(|h| pattern.is_match(&h)) {
                return OriginDecision::Allow;
            }
        }

        warn!(origin = %origin, "CORS blocked origin");
        OriginDecision::Deny
    }
}

fn normalize(origin: &str) -> &str {
    origin.trim_end_matches('/')
}

/// Runs the policy ahead of routing, preflights included.
pub async fn origin_guard(
    State(policy): State<Arc<OriginPolicy>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let origin = match req.headers().get(header::ORIGIN) {
        // Non-UTF8 origin bytes can never match; treat them like a bad URL.
        Some(v) => Some(v.to_str().unwrap_or("<invalid>").to_owned()),
        None => None,
    };

    match policy.decide(origin.as_deref()) {
        OriginDecision::Allow => {
            req.extensions_mut().insert(OriginDecision::Allow);
            Ok(next.run(req).await)
        }
        OriginDecision::Deny => Err(AppError::CorsDenied),
    }
}

/// Reflects an allowed origin back with the fixed method/header sets.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |_origin: &HeaderValue, parts: &axum::http::request::Parts| {
                parts.extensions.get::<OriginDecision>() == Some(&OriginDecision::Allow)
            },
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(pattern: Option<&str>) -> OriginPolicy {
        OriginPolicy::new(
            vec![
                "https://app.example.org".into(),
                "http://localhost:5173/".into(),
            ],
            pattern.map(|p| Regex::new(p).unwrap()),
        )
    }

    #[test]
    fn absent_origin_is_allowed() {
        assert_eq!(policy(None).decide(None), OriginDecision::Allow);
        assert_eq!(
            OriginPolicy::default().decide(None),
            OriginDecision::Allow
        );
    }

    #[test]
    fn allowlisted_origins_match_with_or_without_trailing_slash() {
        let p = policy(None);
        for origin in ["https://app.example.org", "http://localhost:5173"] {
            assert_eq!(p.decide(Some(origin)), OriginDecision::Allow);
            let with_slash = format!("{origin}/");
            assert_eq!(p.decide(Some(with_slash.as_str())), OriginDecision::Allow);
        }
    }

    #[test]
    fn unknown_origin_is_denied() {
        let p = policy(None);
        assert_eq!(p.decide(Some("https://evil.test")), OriginDecision::Deny);
        assert_eq!(
            p.decide(Some("https://app.example.org.evil.test")),
            OriginDecision::Deny
        );
    }

    #[test]
    fn pattern_matches_hostname_strictly() {
        let p = policy(Some(r"^[a-z0-9-]+\.example\.com$"));
        assert_eq!(
            p.decide(Some("https://preview123.example.com")),
            OriginDecision::Allow
        );
        assert_eq!(
            p.decide(Some("https://preview123.example.com:8443/")),
            OriginDecision::Allow
        );
        assert_eq!(
            p.decide(Some("https://example.com.evil.com")),
            OriginDecision::Deny
        );
    }

    #[test]
    fn malformed_origin_does_not_panic() {
        let p = policy(Some(r"^[a-z0-9-]+\.example\.com$"));
        assert_eq!(p.decide(Some("not a url")), OriginDecision::Deny);
        assert_eq!(p.decide(Some("")), OriginDecision::Deny);
        assert_eq!(p.decide(Some("null")), OriginDecision::Deny);
    }

    #[test]
    fn from_config_uses_configured_lists() {
        let cfg = CorsConfig {
            allowed_origins: vec!["https://crm.example.net".into()],
            origin_pattern: None,
        };
        let p = OriginPolicy::from_config(&cfg);
        assert_eq!(
            p.decide(Some("https://crm.example.net/")),
            OriginDecision::Allow
        );
        assert_eq!(p.decide(Some("https://other.net")), OriginDecision::Deny);
    }
}
