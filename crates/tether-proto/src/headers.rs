//! Header block codec.
//!
//! Message headers travel as a small text blob in front of the payload of
//! `HMSG`/`HPUB` frames:
//!
//! ```text
//! NATS/1.0\r\n
//! key:value\r\n
//! key:value\r\n
//! \r\n
//! ```
//!
//! The version line is carried verbatim (a server may append a status code,
//! e.g. `NATS/1.0 503`); every following line is split at its *first* `:`.
//! Keys therefore must not contain `:`, while values may. Lines with no `:`
//! at all, or whose `:` is the first character, are skipped silently.

use crate::HEADER_VERSION;

/// Ordered multimap of header names to values.
///
/// Insertion order is preserved and a name may appear more than once
/// ([`HeaderMap::append`]). Names are matched exactly (case-sensitive);
/// both names and values are opaque strings to this codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    version: String,
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map with the standard version line.
    #[must_use]
    pub fn new() -> Self {
        Self { version: HEADER_VERSION.to_string(), entries: Vec::new() }
    }

    /// The version line, e.g. `NATS/1.0` or `NATS/1.0 503`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of header entries (not counting the version line).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set `name` to `value`, removing any previous entries for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| *k != name);
        self.entries.push((name, value.into()));
    }

    /// Add an entry for `name` without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries.iter().filter(move |(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Iterate over all `(name, value)` entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the wire blob (version line, entries, blank line).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.version.len() + 4 + self.entries.len() * 16);
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.push(b':');
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Parse a wire blob.
    ///
    /// The first line is taken verbatim as the version. Every later line is
    /// split at its first `:`; lines without one, or starting with one, are
    /// skipped. Bytes are decoded lossily - headers are expected to be UTF-8
    /// but a stray byte must not poison the whole message.
    #[must_use]
    pub fn parse(blob: &[u8]) -> Self {
        let mut lines = blob.split(|&b| b == b'\n').map(|line| line.strip_suffix(b"\r").unwrap_or(line));

        let version = match lines.next() {
            Some(line) if !line.is_empty() => String::from_utf8_lossy(line).into_owned(),
            _ => HEADER_VERSION.to_string(),
        };

        let mut entries = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some(idx) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            if idx == 0 {
                continue;
            }
            let name = String::from_utf8_lossy(&line[..idx]).into_owned();
            let value = String::from_utf8_lossy(&line[idx + 1..]).into_owned();
            entries.push((name, value));
        }

        Self { version, entries }
    }
}

impl Default for HeaderMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_mapping() {
        let mut headers = HeaderMap::new();
        headers.insert("subject-token", "abc");
        headers.append("trace", "one");
        headers.append("trace", "two");

        let parsed = HeaderMap::parse(&headers.to_bytes());
        assert_eq!(parsed, headers);
        assert_eq!(parsed.get("subject-token"), Some("abc"));
        assert_eq!(parsed.get_all("trace").collect::<Vec<_>>(), vec!["one", "two"]);
    }

    #[test]
    fn value_may_contain_colons() {
        let mut headers = HeaderMap::new();
        headers.insert("time", "12:34:56");

        let parsed = HeaderMap::parse(&headers.to_bytes());
        assert_eq!(parsed.get("time"), Some("12:34:56"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let blob = b"NATS/1.0\r\nno-colon-here\r\n:empty-key\r\ngood:value\r\n\r\n";
        let parsed = HeaderMap::parse(blob);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get("good"), Some("value"));
    }

    #[test]
    fn version_line_carried_verbatim() {
        let blob = b"NATS/1.0 503\r\n\r\n";
        let parsed = HeaderMap::parse(blob);
        assert_eq!(parsed.version(), "NATS/1.0 503");
        assert!(parsed.is_empty());
    }

    #[test]
    fn insert_replaces_append_accumulates() {
        let mut headers = HeaderMap::new();
        headers.append("k", "1");
        headers.append("k", "2");
        headers.insert("k", "3");
        assert_eq!(headers.get_all("k").collect::<Vec<_>>(), vec!["3"]);
    }
}
