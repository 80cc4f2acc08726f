//! Request-line rewriting for HTTP proxies
//!
//! Turns an origin-form request (`GET /x HTTP/1.1` + `Host: example.com`) into
//! the absolute-form a forward proxy expects (`GET http://example.com/x ...`).
//!
//! ## Method search
//!
//! Method tokens are searched one at a time in [`METHOD_TOKENS`] order over the
//! whole buffer and the first token that occurs anywhere wins. This is not
//! necessarily the leftmost method in the buffer: a token earlier in the list
//! that appears in a header line beats a later token on the request line.
//!
//! ## Capacity
//!
//! The output size is known before any byte is copied. A rewriter is created
//! with a maximum output length (twice the interface MTU by default) and
//! refuses to build anything larger.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::header::find_pattern;
use crate::error::RewriteError;

/// Method tokens in search order, each including its trailing space
pub const METHOD_TOKENS: [&[u8]; 17] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"OPTIONS ",
    b"PATCH ",
    b"HEAD ",
    b"TRACE ",
    b"PROPFIND ",
    b"PROPPATCH ",
    b"MKCOL ",
    b"COPY ",
    b"MOVE ",
    b"LOCK ",
    b"UNLOCK ",
    b"LINK ",
    b"UNLINK ",
];

const HOST_PATTERN: &[u8] = b"Host: ";
const SCHEME: &[u8] = b"http://";
const ABSOLUTE_MARKER: &[u8] = b"http:";

/// Longest hostname copied into the request line
pub const MAX_HOSTNAME_LEN: usize = 511;

/// HTTP request-line rewriter with a bounded output size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRewriter {
    max_len: usize,
}

impl HttpRewriter {
    /// Create a rewriter producing at most `max_len` bytes
    #[must_use]
    pub const fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Create a rewriter sized for an interface MTU (two MTUs of output)
    #[must_use]
    pub const fn for_mtu(mtu: usize) -> Self {
        Self::new(mtu.saturating_mul(2))
    }

    /// Maximum output length
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Rewrite a request to carry an absolute URI
    ///
    /// Returns `Ok(None)` when there is nothing to rewrite: no `Host: ` header,
    /// no recognised method, or a request target that is already absolute.
    ///
    /// # Errors
    ///
    /// Returns [`RewriteError::CapacityExceeded`] when the rewritten request
    /// would be longer than [`max_len`](Self::max_len).
    pub fn rewrite(&self, data: &[u8]) -> Result<Option<Bytes>, RewriteError> {
        let Some(host) = extract_host(data) else {
            trace!(len = data.len(), "No Host header, request left as is");
            return Ok(None);
        };

        let Some((offset, token)) = find_method(data) else {
            trace!(len = data.len(), "No method token, request left as is");
            return Ok(None);
        };

        let insert_at = offset + token.len();
        if data[insert_at..].starts_with(ABSOLUTE_MARKER) {
            trace!("Request target already absolute");
            return Ok(None);
        }

        let needed = data.len() + SCHEME.len() + host.len();
        if needed > self.max_len {
            return Err(RewriteError::CapacityExceeded {
                needed,
                max: self.max_len,
            });
        }

        let mut out = BytesMut::with_capacity(needed);
        out.put_slice(&data[..insert_at]);
        out.put_slice(SCHEME);
        out.put_slice(host);
        out.put_slice(&data[insert_at..]);

        trace!(
            from = data.len(),
            to = out.len(),
            host = %String::from_utf8_lossy(host),
            "Request rewritten to absolute form"
        );

        Ok(Some(out.freeze()))
    }
}

/// Hostname following `Host: `, up to CR or [`MAX_HOSTNAME_LEN`] bytes
fn extract_host(data: &[u8]) -> Option<&[u8]> {
    let start = find_pattern(data, HOST_PATTERN)? + HOST_PATTERN.len();
    let rest = &data[start..];
    let len = rest
        .iter()
        .take(MAX_HOSTNAME_LEN)
        .position(|&b| b == b'\r')
        .unwrap_or_else(|| rest.len().min(MAX_HOSTNAME_LEN));
    Some(&rest[..len])
}

fn find_method(data: &[u8]) -> Option<(usize, &'static [u8])> {
    METHOD_TOKENS
        .iter()
        .find_map(|token| find_pattern(data, token).map(|offset| (offset, *token)))
}
