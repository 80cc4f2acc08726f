//! HTTP request handling for the proxy hop
//!
//! Plain-HTTP requests leaving the device carry an origin-form request target
//! (`GET /path HTTP/1.1`). When such a request is diverted to an HTTP proxy,
//! the request line has to carry an absolute URI instead. This module provides
//! the byte-level primitives for that:
//!
//! - [`header`]: a line-oriented header scanner over raw request bytes
//! - [`rewrite`]: the request-line rewriter that inserts `http://<host>`
//! - [`HTTP_503_RESPONSE`]: the canned reply protocol handlers send when the
//!   upstream cannot be reached
//!
//! None of these functions assume UTF-8 or NUL-terminated input.
//!
//! # Example
//!
//! ```
//! use tun_proxy::http::HttpRewriter;
//!
//! let rewriter = HttpRewriter::for_mtu(1500);
//! let request = b"GET /x HTTP/1.1\r\nHost: example.com\r\n\r\n";
//! let rewritten = rewriter.rewrite(request).unwrap().unwrap();
//! assert!(rewritten.starts_with(b"GET http://example.com/x HTTP/1.1\r\n"));
//! ```

pub mod header;
pub mod rewrite;

pub use header::{find_pattern, get_header, next_header, HeaderLookup};
pub use rewrite::{HttpRewriter, METHOD_TOKENS};

/// Response written back to the client when the backend is unavailable
pub const HTTP_503_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Temporarily Unavailable\r\n\
Content-Type: text/html\r\n\
Connection: close\r\n\r\n\
Backend not available";
