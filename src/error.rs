use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::ContentRange;
use axum_extra::TypedHeader;
use thiserror::Error;

use crate::range::RangeError;

/// Errors surfaced synchronously while setting up a download.
///
/// Anything that goes wrong once a session is streaming is recorded on the
/// session itself and never comes back through this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("`{0}` does not resolve to a regular file")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    MalformedRange(RangeError),
    #[error("range not satisfiable for a length of {total} bytes")]
    RangeNotSatisfiable { total: u64 },
    #[error("downloads are disabled")]
    Disabled,
    #[error("all {0} download slots are busy")]
    TooManySessions(usize),
}

impl From<RangeError> for Error {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::NotSatisfiable { total } => Error::RangeNotSatisfiable { total },
            malformed @ RangeError::Malformed(_) => Error::MalformedRange(malformed),
        }
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::MalformedRange(_) => StatusCode::BAD_REQUEST,
            Error::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Error::Disabled => StatusCode::FORBIDDEN,
            Error::TooManySessions(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Error::RangeNotSatisfiable { total } => {
                let header = TypedHeader(ContentRange::unsatisfied_bytes(total));
                (status, header, ()).into_response()
            }
            other => (status, other.to_string()).into_response(),
        }
    }
}
