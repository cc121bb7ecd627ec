//! Parsers for the line headers that announce a binary payload

use crate::protocol::prompts;

/// What a completed line announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// `+RECEIVE,<handle>,<len>:` followed by socket bytes
    SocketData { handle: usize, len: usize },
    /// `+HTTPREAD: <len>` or `+HTTPHEAD: <len>` followed by body bytes
    Payload { len: usize },
}

/// Recognize a payload-announcing header line
///
/// Returns `None` for ordinary lines and for headers whose numbers do not
/// parse, so a garbled header degrades to a plain token.
pub fn parse(line: &[u8]) -> Option<Header> {
    if let Some(rest) = line.strip_prefix(prompts::RECEIVE.as_bytes()) {
        return parse_receive(rest);
    }
    let rest = line
        .strip_prefix(prompts::HTTPREAD.as_bytes())
        .or_else(|| line.strip_prefix(prompts::HTTPHEAD.as_bytes()))?;
    let len = parse_number(rest)?;
    Some(Header::Payload { len })
}

/// True for a line that introduces inline SMS text on the following line
pub fn introduces_inline_text(line: &[u8]) -> bool {
    line.starts_with(prompts::CMGR.as_bytes())
}

fn parse_receive(rest: &[u8]) -> Option<Header> {
    // "<handle>,<len>:" with the colon optional
    let rest = rest.strip_suffix(b":").unwrap_or(rest);
    let comma = rest.iter().position(|&b| b == b',')?;
    let handle = parse_number(&rest[..comma])?;
    let len = parse_number(&rest[comma + 1..])?;
    Some(Header::SocketData { handle, len })
}

fn parse_number(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_receive() {
        assert_eq!(
            parse(b"+RECEIVE,2,5:"),
            Some(Header::SocketData { handle: 2, len: 5 })
        );
        assert_eq!(
            parse(b"+RECEIVE,0,1460"),
            Some(Header::SocketData {
                handle: 0,
                len: 1460
            })
        );
    }

    #[test]
    fn test_header_http_payload() {
        assert_eq!(parse(b"+HTTPREAD: 120"), Some(Header::Payload { len: 120 }));
        assert_eq!(parse(b"+HTTPHEAD: 7"), Some(Header::Payload { len: 7 }));
    }

    #[test]
    fn test_header_rejects_plain_and_garbled_lines() {
        assert_eq!(parse(b"OK"), None);
        assert_eq!(parse(b"+RECEIVE,x,5:"), None);
        assert_eq!(parse(b"+HTTPREAD: many"), None);
    }

    #[test]
    fn test_header_inline_text() {
        assert!(introduces_inline_text(b"+CMGR: \"REC UNREAD\",\"+351\""));
        assert!(!introduces_inline_text(b"+CMGS: 12"));
    }
}
