//! Server-side subject matching.
//!
//! Subjects are dot-separated token lists. A subscription filter may use
//! `*` to match exactly one token and a trailing `>` to match one-or-more
//! remaining tokens. The client treats subjects as opaque; matching is the
//! server's job, which is why this lives in the harness.

/// Does `filter` match the concrete `subject`?
#[must_use]
pub fn matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (None, None) => return true,
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {},
            (Some(want), Some(got)) if want == got => {},
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(matches("a.b.c", "a.b.c"));
        assert!(!matches("a.b.c", "a.b"));
        assert!(!matches("a.b", "a.b.c"));
        assert!(!matches("a.b.c", "a.b.x"));
    }

    #[test]
    fn star_matches_one_token() {
        assert!(matches("subject1.*", "subject1.1"));
        assert!(matches("subject1.*", "subject1.2"));
        assert!(!matches("subject1.*", "subject1"));
        assert!(!matches("subject1.*", "subject1.1.2"));
        assert!(matches("*.b", "a.b"));
    }

    #[test]
    fn tail_matches_rest() {
        assert!(matches("a.>", "a.b"));
        assert!(matches("a.>", "a.b.c.d"));
        assert!(!matches("a.>", "a"));
        assert!(matches(">", "anything.at.all"));
    }

    #[test]
    fn mixed_wildcards() {
        assert!(matches("a.*.c.>", "a.b.c.d.e"));
        assert!(!matches("a.*.c.>", "a.b.x.d"));
    }
}
