//! HTTP header collection
//!
//! Headers are stored in insertion order with exact-case names. Names and
//! values are trimmed of surrounding whitespace on insert; inserting a name
//! that is already present replaces its value (last write wins).

use super::{Error, Result};
use std::fmt;

/// HTTP headers collection
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header, replacing any existing value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().trim().to_string();
        let value = value.into().trim().to_string();

        if let Some(slot) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.headers.push((name, value));
        }
    }

    /// Get the value for a header name (exact-case match).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n == name)
    }

    /// Remove a header, returning true when it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| n != name);
        initial_len != self.headers.len()
    }

    /// Get the number of headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterate over all headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value.
    ///
    /// A line with no colon is a protocol violation; an empty name after
    /// trimming likewise.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let colon = line
            .find(':')
            .ok_or_else(|| Error::InvalidHeader(format!("no colon in header: {}", line)))?;

        let name = line[..colon].trim().to_string();
        let value = line[colon + 1..].trim().to_string();

        if name.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }

        Ok((name, value))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}
