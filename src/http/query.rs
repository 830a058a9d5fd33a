//! URL decoding and query-string parsing
//!
//! The path and the query live in different encoding domains: `+` stands for
//! a space only in form-encoded query strings, so the path decoder leaves it
//! literal while the query decoder maps it to a space. Invalid percent
//! escapes are passed through unchanged rather than rejected.

use std::collections::HashMap;

/// Percent-decode a string.
///
/// `plus_to_space` selects the form-encoding rule for `+`.
pub fn url_decode(src: &str, plus_to_space: bool) -> String {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(value) => {
                        out.push(value);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_to_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Parse a query string (`key1=value1&key2=value2`) into a map.
///
/// Keys and values are percent-decoded with `+` as space. A parameter with no
/// `=` is stored with an empty value; duplicate keys keep the last value.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, value)) => {
                params.insert(url_decode(key, true), url_decode(value, true));
            }
            None => {
                params.insert(url_decode(part, true), String::new());
            }
        }
    }

    params
}
