//! Line-oriented HTTP header scanning
//!
//! The scanner walks a request buffer one CRLF-terminated line at a time
//! without copying. A request is only considered complete once the blank line
//! that ends the header block has been seen, so a lookup distinguishes
//! "header absent" from "request incomplete".

const CRLF: &[u8] = b"\r\n";

/// Outcome of a header lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLookup<'a> {
    /// The header was found; the value has leading blanks removed
    Found(&'a [u8]),
    /// The buffer ended before the blank line terminating the headers
    Incomplete,
    /// The header block is complete and the header is not in it
    Absent,
}

impl<'a> HeaderLookup<'a> {
    /// The header value, if found
    #[must_use]
    pub const fn value(self) -> Option<&'a [u8]> {
        match self {
            Self::Found(value) => Some(value),
            Self::Incomplete | Self::Absent => None,
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|w| w == CRLF)
}

/// Advance to the next line and return its length
///
/// The cursor is moved past the first CRLF pair in the remaining buffer, so it
/// then points at the start of the following line. The returned value is that
/// line's length excluding its own CRLF.
///
/// Returns 0 at a blank line. When the remaining bytes do not hold another
/// complete line, returns 0 and leaves the cursor empty.
pub fn next_header(cursor: &mut &[u8]) -> usize {
    let Some(end) = find_crlf(cursor) else {
        *cursor = &[];
        return 0;
    };
    *cursor = &cursor[end + CRLF.len()..];

    match find_crlf(cursor) {
        Some(len) => len,
        None => {
            *cursor = &[];
            0
        }
    }
}

/// Look up a header value by name
///
/// The first line of `data` (the request line) is skipped. Names are compared
/// ASCII case-insensitively and must be followed by `:`; a trailing `:` on
/// `name` itself is accepted. Spaces and tabs before the value are skipped.
#[must_use]
pub fn get_header<'a>(name: &str, data: &'a [u8]) -> HeaderLookup<'a> {
    let name = name.strip_suffix(':').unwrap_or(name).as_bytes();
    let mut cursor = data;

    loop {
        let len = next_header(&mut cursor);
        if len == 0 {
            break;
        }

        let line = &cursor[..len];
        if line.len() > name.len()
            && line[..name.len()].eq_ignore_ascii_case(name)
            && line[name.len()] == b':'
        {
            let value = &line[name.len() + 1..];
            let start = value
                .iter()
                .position(|&b| b != b' ' && b != b'\t')
                .unwrap_or(value.len());
            return HeaderLookup::Found(&value[start..]);
        }
    }

    if cursor.is_empty() {
        HeaderLookup::Incomplete
    } else {
        HeaderLookup::Absent
    }
}

/// Find the first occurrence of `pattern` in `data`
///
/// The first byte must match exactly; the remaining bytes are compared ASCII
/// case-insensitively. Returns the offset of the match.
#[must_use]
pub fn find_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    let (&first, rest) = pattern.split_first()?;
    data.windows(pattern.len())
        .position(|w| w[0] == first && w[1..].eq_ignore_ascii_case(rest))
}
