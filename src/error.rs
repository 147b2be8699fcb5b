use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The remote service an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    GitHub,
    Notion,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::GitHub => f.write_str("GitHub"),
            Service::Notion => f.write_str("Notion"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Credentials rejected (401/403). Fatal: the whole run aborts.
    #[error("{service} rejected the configured credentials (HTTP {status})")]
    UpstreamAuth { service: Service, status: u16 },

    /// Throttled by the remote. Retryable with backoff before being
    /// downgraded to a per-entity error.
    #[error("{service} rate limit hit")]
    UpstreamRateLimit {
        service: Service,
        retry_after: Option<Duration>,
    },

    /// The remote answered with a body that violates its own schema.
    #[error("malformed {service} response: {message}")]
    MalformedResponse { service: Service, message: String },

    /// More than one Notion page claims the same external identifier.
    /// Surfaced for operator remediation, never auto-resolved.
    #[error("{count} pages in database {database_id} share identifier {external_id}")]
    DuplicatePage {
        database_id: String,
        external_id: String,
        count: usize,
    },

    /// Network-level failure (connect, timeout). Timeouts are retryable.
    #[error("{service} request failed: {source}")]
    Transport {
        service: Service,
        #[source]
        source: reqwest::Error,
    },

    /// Non-auth, non-throttle HTTP error from the remote.
    #[error("{service} returned HTTP {status}: {body}")]
    Api {
        service: Service,
        status: u16,
        body: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Fatal errors abort the run; everything else is isolated per entity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::UpstreamAuth { .. } | SyncError::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::UpstreamRateLimit { .. } => true,
            SyncError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }

    /// Server-advertised wait before the next attempt, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::UpstreamRateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Seconds-valued Retry-After header, when present and parseable.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Classify a non-success HTTP status into the error taxonomy.
///
/// `throttled` marks a 403 that carried rate-limit exhaustion headers; plain
/// 403s are credential rejections.
pub fn classify_status(
    service: Service,
    status: u16,
    throttled: bool,
    retry_after: Option<Duration>,
    body: String,
) -> SyncError {
    match status {
        429 => SyncError::UpstreamRateLimit {
            service,
            retry_after,
        },
        403 if throttled => SyncError::UpstreamRateLimit {
            service,
            retry_after,
        },
        401 | 403 => SyncError::UpstreamAuth { service, status },
        _ => SyncError::Api {
            service,
            status,
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_fatal_rate_limit_is_not() {
        let auth = classify_status(Service::Notion, 401, false, None, String::new());
        assert!(auth.is_fatal());
        assert!(!auth.is_retryable());

        let throttle = classify_status(Service::GitHub, 429, false, None, String::new());
        assert!(!throttle.is_fatal());
        assert!(throttle.is_retryable());
    }

    #[test]
    fn forbidden_with_exhausted_quota_is_rate_limit() {
        let err = classify_status(
            Service::GitHub,
            403,
            true,
            Some(Duration::from_secs(7)),
            String::new(),
        );
        assert!(matches!(err, SyncError::UpstreamRateLimit { .. }));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn plain_forbidden_is_auth() {
        let err = classify_status(Service::GitHub, 403, false, None, String::new());
        assert!(matches!(err, SyncError::UpstreamAuth { status: 403, .. }));
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(reqwest::header::RETRY_AFTER, "later".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn other_statuses_are_api_errors() {
        let err = classify_status(Service::Notion, 500, false, None, "boom".into());
        assert!(matches!(err, SyncError::Api { status: 500, .. }));
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
    }
}
