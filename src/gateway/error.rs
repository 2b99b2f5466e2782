//! Failure exits of the gateway and their client-visible status.

use axum::http::StatusCode;
use thiserror::Error;

use crate::http::upstream::UpstreamError;
use crate::net::ResolveError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The upstream host could not be resolved for this request.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// No response could be obtained from the upstream.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The upstream answered, but without a usable status.
    #[error("upstream returned no usable status (got {0})")]
    NoStatus(u16),
}

impl GatewayError {
    /// Resolution and transport failures are 502; a response without a
    /// usable status is 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Resolve(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NoStatus(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve",
            Self::Upstream(e) => e.reason(),
            Self::NoStatus(_) => "no_status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let resolve = GatewayError::Resolve(ResolveError::NoAddress {
            host: "example.test".into(),
        });
        assert_eq!(resolve.status_code(), StatusCode::BAD_GATEWAY);

        let upstream = GatewayError::Upstream(UpstreamError::Unresolved);
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);

        assert_eq!(
            GatewayError::NoStatus(0).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
