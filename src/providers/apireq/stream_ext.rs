use super::{JsonStreamParser, StreamFormat};

pub(crate) trait ReqwestResponseStreamExt {
    /// Frame the body as newline-delimited JSON.
    fn stream_ndjson(self) -> JsonStreamParser;

    /// Frame the body as a server-sent event stream.
    fn stream_sse(self) -> JsonStreamParser;
}

impl ReqwestResponseStreamExt for reqwest::Response {
    fn stream_ndjson(self) -> JsonStreamParser {
        JsonStreamParser::new(Box::pin(self.bytes_stream()), StreamFormat::Ndjson)
    }

    fn stream_sse(self) -> JsonStreamParser {
        JsonStreamParser::new(Box::pin(self.bytes_stream()), StreamFormat::Sse)
    }
}
