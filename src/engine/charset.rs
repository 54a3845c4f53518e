// src/engine/charset.rs
// =============================================================================
// Turns raw response bytes into UTF-8.
//
// Plenty of sites still serve GBK, Shift_JIS or windows-1252. We work out the
// encoding the way browsers roughly do:
//   1. a byte order mark
//   2. the charset= parameter of the Content-Type header
//   3. a <meta charset> / http-equiv declaration in the first 1024 bytes
//   4. UTF-8 if those same bytes are valid UTF-8, windows-1252 otherwise
// and then decode the whole body with encoding_rs. Malformed sequences become
// U+FFFD instead of failing the fetch.
// =============================================================================

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use regex::bytes::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// How much of the body is scanned for a <meta> declaration.
pub const SNIFF_LEN: usize = 1024;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .expect("meta charset pattern is valid")
});

/// Picks the encoding for a response body.
pub fn detect_encoding(body: &[u8], content_type: Option<&str>) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }

    if let Some(encoding) = content_type.and_then(charset_from_content_type) {
        return encoding;
    }

    let prefix = &body[..body.len().min(SNIFF_LEN)];
    if let Some(encoding) = charset_from_meta(prefix) {
        return encoding;
    }

    if looks_like_utf8(prefix, body.len() > prefix.len()) {
        UTF_8
    } else {
        WINDOWS_1252
    }
}

// Only the sniffed prefix is checked. A multi-byte character cut off at its
// end still counts as valid, but only when the body goes on past it.
fn looks_like_utf8(prefix: &[u8], truncated: bool) -> bool {
    match std::str::from_utf8(prefix) {
        Ok(_) => true,
        Err(e) => truncated && e.error_len().is_none(),
    }
}

/// Decodes `body` to UTF-8 bytes, reusing the buffer when it already is.
pub fn decode_body(body: Vec<u8>, content_type: Option<&str>) -> Vec<u8> {
    let encoding = detect_encoding(&body, content_type);
    let decoded = match encoding.decode(&body).0 {
        Cow::Borrowed(s) if s.len() == body.len() => None,
        other => Some(other.into_owned().into_bytes()),
    };
    decoded.unwrap_or(body)
}

fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, value)| {
            Encoding::for_label(value.trim().trim_matches(|c| c == '"' || c == '\'').as_bytes())
        })
}

fn charset_from_meta(prefix: &[u8]) -> Option<&'static Encoding> {
    let caps = META_CHARSET.captures(prefix)?;
    let label = caps.get(1)?.as_bytes();
    // A page can't really be UTF-16 if we just read its <meta> as ASCII;
    // output_encoding() maps that (and "replacement") back to UTF-8.
    Encoding::for_label(label).map(Encoding::output_encoding)
}
