use std::io::Write;

use bytes::Bytes;
use flate2::write::GzEncoder;
use url::Url;

use crate::config::Compression;

const CONTENT_TYPE: &str = "content-type";
const CONTENT_ENCODING: &str = "content-encoding";

/// One fully resolved request, retried as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUnit {
    pub url: Url,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
}

/// Body plus resolved query, produced by the splitter before headers and the
/// base URL are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDraft {
    pub query: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base: Url,
    headers: Vec<(String, String)>,
    compression: Compression,
}

impl RequestBuilder {
    /// `content_type` applies unless `headers` already names one.
    pub fn new(
        base: Url,
        content_type: &str,
        headers: &[(String, String)],
        compression: Compression,
    ) -> Self {
        let mut all = Vec::with_capacity(headers.len() + 2);
        if !headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(CONTENT_TYPE))
        {
            all.push((CONTENT_TYPE.to_owned(), content_type.to_owned()));
        }
        if compression == Compression::Gzip {
            all.push((CONTENT_ENCODING.to_owned(), "gzip".to_owned()));
        }
        all.extend(headers.iter().cloned());
        Self {
            base,
            headers: all,
            compression,
        }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Append `query` to the base URL in the given order. Never fails; the
    /// base URL was validated at startup.
    pub fn build(&self, query: &[(String, String)], body: Bytes) -> RequestUnit {
        let mut url = self.base.clone();
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        RequestUnit {
            url,
            body,
            headers: self.headers.clone(),
        }
    }
}

pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}
