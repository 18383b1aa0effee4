//! Ordered placeholder substitutions applied to configuration values.

use crate::error::{Error, Result};

/// Ordered `(pattern, replacement)` pairs, applied first to last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    pairs: Vec<(String, String)>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `pattern=replacement` entries. Only the first `=` separates.
    pub fn parse_pairs<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut subs = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            let Some((pattern, replacement)) = entry.split_once('=') else {
                return Err(Error::configuration(format!(
                    "invalid substitution '{}', expected pattern=replacement",
                    entry
                )));
            };
            if pattern.is_empty() {
                return Err(Error::configuration(format!(
                    "invalid substitution '{}', empty pattern",
                    entry
                )));
            }
            subs.push(pattern, replacement);
        }
        Ok(subs)
    }

    pub fn push(&mut self, pattern: impl Into<String>, replacement: impl Into<String>) {
        self.pairs.push((pattern.into(), replacement.into()));
    }

    pub fn extend(&mut self, other: &Substitutions) {
        self.pairs.extend(other.pairs.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(p, r)| (p.as_str(), r.as_str()))
    }

    /// Replace every occurrence of each pattern, in insertion order.
    pub fn apply(&self, value: &str) -> String {
        let mut out = value.to_string();
        for (pattern, replacement) in &self.pairs {
            if !pattern.is_empty() && out.contains(pattern.as_str()) {
                out = out.replace(pattern.as_str(), replacement);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_splits_on_first_equals() {
        let subs = Substitutions::parse_pairs(["%QT_VERSION%=6.5.0", "%OPTS%=a=b"]).unwrap();
        let pairs: Vec<_> = subs.iter().collect();
        assert_eq!(pairs, vec![("%QT_VERSION%", "6.5.0"), ("%OPTS%", "a=b")]);
    }

    #[test]
    fn test_parse_pairs_rejects_garbage() {
        assert!(Substitutions::parse_pairs(["novalue"]).is_err());
        assert!(Substitutions::parse_pairs(["=value"]).is_err());
    }

    #[test]
    fn test_apply_in_order() {
        let mut subs = Substitutions::new();
        subs.push("%A%", "%B%");
        subs.push("%B%", "done");
        assert_eq!(subs.apply("x/%A%/%B%"), "x/done/done");
        assert_eq!(subs.apply("untouched"), "untouched");
    }
}
