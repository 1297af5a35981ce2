//! HTTP core error types.
//!
//! Errors never reach the client verbatim: [`Error::status`] picks the status
//! code and [`Error::into_response`] renders a generic Redfish error body.

use http::{Method, StatusCode};

use crate::messages;
use crate::response::Response;

/// Errors raised while reading, routing or answering a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket I/O failed.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// A JSON body could not be decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Authorization lookup failed, including a locked registry.
    #[error(transparent)]
    Auth(#[from] bmcweb_auth::error::Error),

    /// The header section is not valid HTTP/1.x.
    #[error("Malformed request: {0}")]
    Parse(#[from] httparse::Error),

    /// The request parsed but breaks a framing or protocol rule.
    #[error("Bad request: {0}")]
    BadRequest(&'static str),

    /// The header section grew past the configured limit.
    #[error("Request header section exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// The body grew past the configured limit.
    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    /// A route pattern failed to parse at registration.
    #[error("Invalid route pattern '{0}'")]
    InvalidPattern(String),

    /// Two rules claim the same pattern and method.
    #[error("Route {method} {pattern} registered twice")]
    DuplicateRoute { pattern: String, method: Method },
}

impl Error {
    /// Status code reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Parse(_) | Error::BadRequest(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::HeaderTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Error::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Auth(bmcweb_auth::error::Error::RegistryLocked) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the error as a Redfish response without leaking its text.
    pub fn into_response(self) -> Response {
        let mut res = Response::new();
        match self.status() {
            StatusCode::BAD_REQUEST if matches!(self, Error::Json(_)) => {
                messages::malformed_json(&mut res)
            }
            StatusCode::SERVICE_UNAVAILABLE => messages::service_temporarily_unavailable(&mut res, "30"),
            StatusCode::INTERNAL_SERVER_ERROR => messages::internal_error(&mut res),
            status => res.set_status(status),
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_do_not_leak_details() {
        assert_eq!(Error::BodyTooLarge(16).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            Error::HeaderTooLarge(8192).status(),
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
        );

        let res = Error::Auth(bmcweb_auth::error::Error::RegistryLocked).into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let io = std::io::Error::other("disk on fire");
        let res = Error::from(io).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!res.json().to_string().contains("disk on fire"));
    }
}
