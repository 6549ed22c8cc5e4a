//! Route lookup.
//!
//! # Responsibilities
//! - Compile services into routes once, at startup
//! - Validate each target URL once; a bad target poisons only its route
//! - Look up the route for a request path (longest prefix wins)
//! - Build the downstream URL with the prefix rewritten away
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) prefix scan (acceptable for typical route counts)
//! - Explicit `None` rather than a silent default route

use std::time::Duration;

use url::Url;

use crate::config::ServiceConfig;
use crate::routing::matcher::PathPrefixMatcher;

/// A downstream base URL, checked once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Valid(Url),
    Invalid { raw: String, reason: String },
}

impl Target {
    pub fn parse(raw: &str) -> Self {
        let invalid = |reason: String| Target::Invalid {
            raw: raw.to_string(),
            reason,
        };

        if raw.trim().is_empty() {
            return invalid("target URL is missing".to_string());
        }
        match Url::parse(raw) {
            Ok(url) if !matches!(url.scheme(), "http" | "https") => {
                invalid(format!("unsupported scheme '{}'", url.scheme()))
            }
            Ok(url) if url.host_str().is_none() => invalid("target URL has no host".to_string()),
            Ok(url) => Target::Valid(url),
            Err(e) => invalid(e.to_string()),
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            Target::Valid(url) => Some(url),
            Target::Invalid { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.url().is_some()
    }

    /// The configured string, valid or not.
    pub fn raw(&self) -> &str {
        match self {
            Target::Valid(url) => url.as_str(),
            Target::Invalid { raw, .. } => raw,
        }
    }
}

/// Append `path` (starting with `/` or empty) and `query` to a base URL.
pub fn join_target(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let base_path = base.path().trim_end_matches('/');
    let joined = match (base_path.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (_, true) => base_path.to_string(),
        _ => format!("{}{}", base_path, path),
    };
    url.set_path(&joined);
    url.set_query(query.filter(|q| !q.is_empty()));
    url
}

/// A compiled route to one downstream service.
#[derive(Debug, Clone)]
pub struct Route {
    pub service: String,
    pub matcher: PathPrefixMatcher,
    pub target: Target,
    pub timeout: Duration,
    pub retry_count: u32,
}

impl Route {
    pub fn from_config(service: &ServiceConfig) -> Self {
        Self {
            service: service.name.clone(),
            matcher: PathPrefixMatcher::new(service.path_prefix.as_str()),
            target: Target::parse(&service.target),
            timeout: Duration::from_millis(service.timeout_ms),
            retry_count: service.retry_count,
        }
    }

    /// Downstream URL for an inbound path and query, if the target is valid
    /// and the path belongs to this route.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Option<Url> {
        let rest = self.matcher.strip(path)?;
        self.target.url().map(|base| join_target(base, rest, query))
    }
}

/// Routing table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let mut routes: Vec<Route> = services.iter().map(Route::from_config).collect();
        routes.sort_by(|a, b| b.matcher.prefix().len().cmp(&a.matcher.prefix().len()));

        for route in &routes {
            if let Target::Invalid { raw, reason } = &route.target {
                tracing::error!(
                    service = %route.service,
                    prefix = %route.matcher.prefix(),
                    target = %raw,
                    reason = %reason,
                    "Invalid target URL; prefix will answer 503 until reconfigured"
                );
            }
        }

        Self { routes }
    }

    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn service(name: &str, prefix: &str, target: &str) -> ServiceConfig {
        let mut service = GatewayConfig::default().services.remove(0);
        service.name = name.to_string();
        service.path_prefix = prefix.to_string();
        service.target = target.to_string();
        service
    }

    #[test]
    fn parses_targets_once() {
        assert!(Target::parse("http://ai-backend:3001").is_valid());
        assert!(Target::parse("https://ai.run.app/base/").is_valid());
        assert!(!Target::parse("not-a-url").is_valid());
        assert!(!Target::parse("").is_valid());
        assert!(!Target::parse("ftp://files.example.com").is_valid());
        assert_eq!(Target::parse("not-a-url").raw(), "not-a-url");
    }

    #[test]
    fn longest_prefix_wins() {
        let router = Router::from_config(&[
            service("api", "/api", "http://a:1"),
            service("ai", "/api/ai", "http://b:2"),
        ]);
        assert_eq!(router.match_path("/api/ai/reply").unwrap().service, "ai");
        assert_eq!(router.match_path("/api/users").unwrap().service, "api");
        assert!(router.match_path("/other").is_none());
    }

    #[test]
    fn rewrites_prefix_away() {
        let route = Route::from_config(&service("ai", "/api/ai", "http://ai:3001"));
        assert_eq!(
            route.upstream_url("/api/ai/detect", Some("lang=ar")).unwrap().as_str(),
            "http://ai:3001/detect?lang=ar"
        );
        assert_eq!(route.upstream_url("/api/ai", None).unwrap().as_str(), "http://ai:3001/");

        let based = Route::from_config(&service("rest", "/api/v1", "https://rest.run.app/v1/"));
        assert_eq!(
            based.upstream_url("/api/v1/users/7", None).unwrap().as_str(),
            "https://rest.run.app/v1/users/7"
        );
        assert_eq!(
            based.upstream_url("/api/v1", Some("")).unwrap().as_str(),
            "https://rest.run.app/v1"
        );
    }

    #[test]
    fn invalid_target_has_no_upstream() {
        let route = Route::from_config(&service("ai", "/api/ai", "not-a-url"));
        assert!(route.matcher.matches("/api/ai/reply"));
        assert!(route.upstream_url("/api/ai/reply", None).is_none());
    }
}
