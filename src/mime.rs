//! RFC 2047 header decoding and Content-Transfer-Encoding decoding.
//!
//! Both decoders are lenient: anything that cannot be decoded is passed
//! through (headers) or collapsed to an empty string (bodies) so that
//! filters always see some text to work with.

use base64::{engine::general_purpose, Engine as _};

/// Decode RFC 2047 encoded words (`=?charset?B|Q?data?=`) in a header
/// value. Only UTF-8 payloads are decoded; encoded words in any other
/// charset, and malformed ones, are left verbatim.
pub fn decode_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("=?") {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        match decode_encoded_word(rest) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push_str("=?");
                rest = &rest[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

// Parses a single "=?charset?enc?text?=" at the start of `input`.
// Returns the decoded text and the number of bytes consumed.
fn decode_encoded_word(input: &str) -> Option<(String, usize)> {
    let inner = input.strip_prefix("=?")?;
    let (charset, rest) = inner.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let (payload, _) = rest.split_once("?=")?;

    if !charset.eq_ignore_ascii_case("utf-8") {
        log::debug!("Skipping encoded word with unsupported charset: {charset}");
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => general_purpose::STANDARD.decode(payload).ok()?,
        "Q" | "q" => decode_q(payload),
        _ => return None,
    };
    let decoded = String::from_utf8(bytes).ok()?;

    // "=?" + charset + "?" + enc + "?" + payload + "?="
    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + payload.len() + 2;
    Some((decoded, consumed))
}

// RFC 2047 "Q" encoding: underscore means space, =XX is a hex-encoded
// byte, everything else is literal.
fn decode_q(payload: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut bytes = payload.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'_' => out.push(b' '),
            b'=' => {
                let hi = bytes.next();
                let lo = bytes.next();
                match (hi.and_then(hex_val), lo.and_then(hex_val)) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => {
                        out.push(b'=');
                        out.extend(hi);
                        out.extend(lo);
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode a message body according to its Content-Transfer-Encoding
/// header value. An empty or unknown label means identity. A payload
/// that fails to decode yields an empty string.
pub fn decode_transfer(body: &[u8], encoding: &str) -> String {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "" | "7bit" | "8bit" | "binary" => String::from_utf8_lossy(body).into_owned(),
        "base64" => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match general_purpose::STANDARD.decode(&compact) {
                Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
                Err(e) => {
                    log::debug!("Base64 body decode failed: {e}");
                    String::new()
                }
            }
        }
        "quoted-printable" => decode_quoted_printable(body),
        other => {
            log::debug!("Unknown transfer encoding '{other}', treating as identity");
            String::from_utf8_lossy(body).into_owned()
        }
    }
}

fn decode_quoted_printable(body: &[u8]) -> String {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b != b'=' {
            out.push(b);
            continue;
        }
        match (bytes.next(), bytes.peek().copied()) {
            // Soft line break: "=\r\n" or "=\n"
            (Some(b'\r'), Some(b'\n')) => {
                bytes.next();
            }
            (Some(b'\n'), _) => {}
            (Some(hi), Some(lo)) => match (hex_val(hi), hex_val(lo)) {
                (Some(h), Some(l)) => {
                    bytes.next();
                    out.push(h << 4 | l);
                }
                _ => {
                    out.push(b'=');
                    out.push(hi);
                }
            },
            (Some(hi), None) => {
                out.push(b'=');
                out.push(hi);
            }
            (None, _) => out.push(b'='),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_subject() {
        let encoded = "=?utf-8?B?44GU5Yip55So5piO57Sw5pu05paw44Gu44GK55+l44KJ44Gb?=";
        assert_eq!(decode_header(encoded), "ご利用明細更新のお知らせ");
    }

    #[test]
    fn test_decode_q_subject() {
        assert_eq!(decode_header("=?UTF-8?Q?Caf=C3=A9_deal?="), "Café deal");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        assert_eq!(
            decode_header("Re: =?utf-8?Q?hello?= world"),
            "Re: hello world"
        );
    }

    #[test]
    fn test_unknown_charset_left_verbatim() {
        let raw = "=?iso-2022-jp?B?GyRCJDMkcyRLJEEkTxsoQg==?=";
        assert_eq!(decode_header(raw), raw);
    }

    #[test]
    fn test_plain_header_untouched() {
        assert_eq!(decode_header("Just a subject"), "Just a subject");
    }

    #[test]
    fn test_transfer_identity() {
        assert_eq!(decode_transfer(b"plain text", ""), "plain text");
        assert_eq!(decode_transfer(b"plain text", "8bit"), "plain text");
    }

    #[test]
    fn test_transfer_base64() {
        assert_eq!(decode_transfer(b"aGVsbG8g\r\nd29ybGQ=", "base64"), "hello world");
    }

    #[test]
    fn test_transfer_base64_invalid_is_empty() {
        assert_eq!(decode_transfer(b"!!! not base64 !!!", "base64"), "");
    }

    #[test]
    fn test_transfer_quoted_printable() {
        assert_eq!(
            decode_transfer(b"buy=20now=\r\nplease", "quoted-printable"),
            "buy nowplease"
        );
    }

    #[test]
    fn test_transfer_unknown_encoding_is_identity() {
        assert_eq!(decode_transfer(b"xyz", "x-booga"), "xyz");
    }
}
