//! Wire lexer: locates CRLF-terminated command lines and tokenizes them.
//!
//! This module is deliberately pure (no I/O) so it can be exercised with partial
//! buffers of any chunking (see `tests::same_result_regardless_of_chunking` in
//! `parser.rs` and the integration tests).

/// Outcome of scanning `buf` for a command line.
pub enum Line<'a> {
    /// No `\n` found yet; the caller needs more bytes.
    Partial,
    /// A `\n` was found but the line isn't CRLF-terminated (either `\n` is the first
    /// byte, or the byte before it isn't `\r`). `consumed` is how many bytes to drop
    /// from the front of the buffer (through the `\n`, inclusive).
    Malformed { consumed: usize },
    /// A complete CRLF-terminated line. `line` excludes the trailing CRLF;
    /// `consumed` is the full length including the CRLF.
    Complete { line: &'a [u8], consumed: usize },
}

/// Find the first command line in `buf`.
pub fn find_line(buf: &[u8]) -> Line<'_> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        return Line::Partial;
    };
    if nl == 0 || buf[nl - 1] != b'\r' {
        return Line::Malformed { consumed: nl + 1 };
    }
    Line::Complete {
        line: &buf[..nl - 1],
        consumed: nl + 1,
    }
}

/// Split a command line into tokens on space, tab, CR or LF, dropping empty tokens
/// produced by runs of separators.
pub fn tokenize(line: &[u8]) -> Vec<&[u8]> {
    line.split(|&b| b == b' ' || b == b'\t' || b == b'\r' || b == b'\n')
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_without_newline() {
        assert!(matches!(find_line(b"get k"), Line::Partial));
    }

    #[test]
    fn malformed_bare_lf() {
        match find_line(b"get k\n") {
            Line::Malformed { consumed } => assert_eq!(consumed, 6),
            _ => panic!("expected malformed"),
        }
    }

    #[test]
    fn malformed_leading_lf() {
        match find_line(b"\nget k\r\n") {
            Line::Malformed { consumed } => assert_eq!(consumed, 1),
            _ => panic!("expected malformed"),
        }
    }

    #[test]
    fn complete_line() {
        match find_line(b"get k\r\nextra") {
            Line::Complete { line, consumed } => {
                assert_eq!(line, b"get k");
                assert_eq!(consumed, 7);
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn tokenizes_on_any_separator() {
        assert_eq!(tokenize(b"set\tkey  0 0 3"), vec![b"set".as_ref(), b"key", b"0", b"0", b"3"]);
    }
}
