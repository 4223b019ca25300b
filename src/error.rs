use crate::registry::ResourceKind;

/// Terminal outcome of a single HTTP fetch, classified for the retry and
/// circuit-breaker logic. Transient kinds are retried with backoff; terminal
/// kinds are returned immediately and never touch the breaker counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FetchErrorKind {
    #[error("request timed out")]
    Timeout,
    #[error("server error {0}")]
    ServerError(u16),
    #[error("dns resolution failed")]
    DnsFailure,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("tls certificate rejected")]
    TlsCertificate,
    #[error("blocked by target ({0})")]
    Blocked(u16),
    #[error("resource not found")]
    NotFound,
    #[error("redirected to site homepage")]
    DeadEndRedirect,
    #[error("circuit open, domain cooling down")]
    CircuitOpen,
    #[error("request failed")]
    Other,
}

impl FetchErrorKind {
    /// Retried with backoff, counts against the domain's breaker.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::ServerError(_) | Self::Other)
    }

    /// Not retried, and by contract never mutates circuit-breaker state.
    /// A TLS failure in particular cannot be fixed by cooling the domain
    /// down; penalizing it used to stall whole runs on multi-minute
    /// cooldowns.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::DnsFailure | Self::ConnectionRefused | Self::TlsCertificate | Self::Blocked(_)
        )
    }

    /// The resource does not exist at this URL; candidate logic should
    /// advance to the next URL rather than retry.
    #[must_use]
    pub const fn is_not_found(self) -> bool {
        matches!(self, Self::NotFound | Self::DeadEndRedirect)
    }
}

/// Why a source produced nothing this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    #[error(transparent)]
    Fetch(#[from] FetchErrorKind),
    #[error("content fetched but no parser strategy produced records")]
    ParseEmpty,
    #[error("no matching urls found by crawling the site")]
    NotDiscoverable,
    #[error("page requires client-side rendering")]
    NeedsRendering,
}

/// One recorded failure, carrying enough context for the recovery pass to
/// classify the source without re-fetching anything.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub source_id: i64,
    pub institution: String,
    pub resource: ResourceKind,
    pub strategy: Option<&'static str>,
    pub kind: FailureKind,
}

impl core::fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} [{}", self.institution, self.resource.as_str())?;
        if let Some(strategy) = self.strategy {
            write!(f, "/{strategy}")?;
        }
        write!(f, "]: {}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_certificate_is_terminal_not_transient() {
        assert!(FetchErrorKind::TlsCertificate.is_terminal());
        assert!(!FetchErrorKind::TlsCertificate.is_transient());
    }

    #[test]
    fn dead_end_redirect_counts_as_not_found() {
        assert!(FetchErrorKind::DeadEndRedirect.is_not_found());
        assert!(FetchErrorKind::NotFound.is_not_found());
        assert!(!FetchErrorKind::Timeout.is_not_found());
    }

    #[test]
    fn transient_and_terminal_are_disjoint() {
        for kind in [
            FetchErrorKind::Timeout,
            FetchErrorKind::ServerError(503),
            FetchErrorKind::DnsFailure,
            FetchErrorKind::ConnectionRefused,
            FetchErrorKind::TlsCertificate,
            FetchErrorKind::Blocked(403),
            FetchErrorKind::NotFound,
            FetchErrorKind::DeadEndRedirect,
            FetchErrorKind::CircuitOpen,
        ] {
            assert!(!(kind.is_transient() && kind.is_terminal()), "{kind:?}");
        }
    }
}
