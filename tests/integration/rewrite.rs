//! HTTP rewriting through the public API
//!
//! Mirrors how a TCP handler uses the primitives: wait for a complete header
//! block, then rewrite the request line with the run's rewriter.

use tun_proxy::config::Config;
use tun_proxy::error::RewriteError;
use tun_proxy::http::{get_header, HeaderLookup, HttpRewriter, HTTP_503_RESPONSE, METHOD_TOKENS};
use tun_proxy::tunnel::Tunnel;

/// Rewrite once the header block is complete, as a handler would
///
/// Looking up a header that is never sent only resolves at the blank line.
fn rewrite_when_complete(rewriter: HttpRewriter, data: &[u8]) -> Option<Vec<u8>> {
    match get_header("X-Never-Sent", data) {
        HeaderLookup::Incomplete => None,
        HeaderLookup::Absent | HeaderLookup::Found(_) => rewriter
            .rewrite(data)
            .ok()
            .map(|out| out.map_or_else(|| data.to_vec(), |b| b.to_vec())),
    }
}

#[test]
fn test_request_arriving_in_segments() {
    let rewriter = Tunnel::new(Config::default()).rewriter();
    let request = b"GET /index.html HTTP/1.1\r\nHost: example.org\r\nAccept: */*\r\n\r\n";

    let mut buffered = Vec::new();
    let mut result = None;
    for chunk in request.chunks(7) {
        buffered.extend_from_slice(chunk);
        result = rewrite_when_complete(rewriter, &buffered);
        if result.is_some() {
            break;
        }
    }

    assert_eq!(buffered.len(), request.len());
    assert_eq!(
        result.unwrap(),
        b"GET http://example.org/index.html HTTP/1.1\r\nHost: example.org\r\nAccept: */*\r\n\r\n"
    );
}

#[test]
fn test_every_method_token_is_rewritten() {
    let rewriter = HttpRewriter::for_mtu(1500);
    for token in METHOD_TOKENS {
        let mut request = token.to_vec();
        request.extend_from_slice(b"/r HTTP/1.1\r\nHost: h\r\n\r\n");

        let out = rewriter.rewrite(&request).unwrap().expect("rewritten");
        let mut expected = token.to_vec();
        expected.extend_from_slice(b"http://h/r HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(&out[..], &expected[..]);
    }
}

#[test]
fn test_small_mtu_rejects_large_request() {
    let mut config = Config::default();
    config.tunnel.mtu = 576;
    let rewriter = Tunnel::new(config).rewriter();

    let mut request = b"GET / HTTP/1.1\r\nHost: big.example\r\nCookie: ".to_vec();
    request.resize(1150, b'c');
    request.extend_from_slice(b"\r\n\r\n");

    let err = rewriter.rewrite(&request).unwrap_err();
    assert_eq!(
        err,
        RewriteError::CapacityExceeded {
            needed: request.len() + "http://".len() + "big.example".len(),
            max: 1152,
        }
    );
}

#[test]
fn test_unavailable_response_is_complete_http() {
    assert!(HTTP_503_RESPONSE.starts_with(b"HTTP/1.1 503 "));
    assert_eq!(
        get_header("Connection", HTTP_503_RESPONSE),
        HeaderLookup::Found(b"close")
    );
}
