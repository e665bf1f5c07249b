//! A utility module with helpers for making and parsing API requests.

mod error;
mod json_stream_parser;
mod stream_ext;

pub(crate) use error::Error as ReqwestError;
pub(crate) use reqwest::Url;

pub(crate) use json_stream_parser::Error as JsonStreamError;
pub(crate) use json_stream_parser::{JsonStreamParser, StreamFormat};
pub(crate) use stream_ext::ReqwestResponseStreamExt;

#[cfg(test)]
pub(crate) use json_stream_parser::tests::chunked_body;

/// Join an endpoint path onto an API base, keeping any path prefix the base
/// carries (e.g. a proxy mounted under `/openai/`).
pub(crate) fn endpoint(api_base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = api_base.clone();

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(path.trim_start_matches('/'))
}
