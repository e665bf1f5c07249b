//! Wrapper around Reqwest's error type to facilitate exclusive matching, and
//! the conversions from transport-level errors into provider errors.

use std::error::Error as StdError;
use std::fmt;

use super::JsonStreamError;
use crate::providers::{Error as ProviderError, ErrorKind as ProviderErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    ConnectFailed,
    DecodingFailed,
    RedirectPolicyViolated,
    TimedOut,
    UnknownReqwestError,
}

#[derive(Debug)]
pub(crate) struct Error {
    kind: ErrorKind,
    source: reqwest::Error,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_decode() {
            ErrorKind::DecodingFailed
        } else if err.is_timeout() {
            ErrorKind::TimedOut
        } else if err.is_redirect() {
            ErrorKind::RedirectPolicyViolated
        } else if err.is_connect() {
            ErrorKind::ConnectFailed
        } else {
            ErrorKind::UnknownReqwestError
        };

        Error { kind, source: err }
    }
}

impl Error {
    pub(crate) fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.kind {
            ErrorKind::ConnectFailed => "connection failed",
            ErrorKind::DecodingFailed => "decoding failed",
            ErrorKind::RedirectPolicyViolated => "redirect policy violated",
            ErrorKind::TimedOut => "timed out",
            ErrorKind::UnknownReqwestError => "unknown reqwest error",
        };

        f.write_str(text)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

impl From<Error> for ProviderError {
    fn from(value: Error) -> Self {
        let kind = match value.kind() {
            ErrorKind::ConnectFailed => ProviderErrorKind::Connection,
            ErrorKind::DecodingFailed | ErrorKind::RedirectPolicyViolated => {
                ProviderErrorKind::UnexpectedResponse
            }
            ErrorKind::TimedOut => ProviderErrorKind::TimedOut,
            ErrorKind::UnknownReqwestError => ProviderErrorKind::UnspecifiedError,
        };

        ProviderError::from_source(kind, Box::new(value))
    }
}

impl From<JsonStreamError> for ProviderError {
    fn from(value: JsonStreamError) -> Self {
        match value {
            // Keep the transport classification of the underlying failure
            JsonStreamError::StreamFailed(err) => err.into(),
            value => ProviderError::from_source(ProviderErrorKind::UnexpectedResponse, Box::new(value)),
        }
    }
}
