//! Minimal INI reader compatible with the configuration files the packaging
//! scripts consume.
//!
//! Supported syntax:
//! - `[section]` headers, case-sensitive names, duplicates rejected
//! - `key = value` or `key: value`, keys are case-insensitive
//! - `#` and `;` full-line comments
//! - indented continuation lines, joined with `\n`
//! - a `[DEFAULT]` section whose keys every other section inherits
//! - `${key}`, `${section:key}` and `$$` interpolation on read
//!
//! # Example
//!
//! ```rust
//! use sdk_packager::config::IniDocument;
//!
//! let doc = IniDocument::parse("[common]\nroot = /srv\n[task.a.b]\nrepo = ${common:root}/a\n").unwrap();
//! assert_eq!(doc.get("task.a.b", "repo").unwrap().as_deref(), Some("/srv/a"));
//! ```

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_SECTION: &str = "DEFAULT";

const MAX_INTERPOLATION_DEPTH: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn raw(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// Parsed INI file with sections in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    defaults: IniSection,
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::path(path, e))?;
        Self::parse(&text).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = IniDocument {
            defaults: IniSection {
                name: DEFAULT_SECTION.to_string(),
                entries: Vec::new(),
            },
            sections: Vec::new(),
        };
        // Index into `sections`, or None for DEFAULT. Outer None means no header yet.
        let mut current: Option<Option<usize>> = None;
        // Key and indentation of the value that continuation lines extend.
        let mut open_value: Option<(String, usize)> = None;

        for (idx, line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                open_value = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indent = line.len() - line.trim_start().len();
            if let (Some((key, key_indent)), Some(section)) = (&open_value, current) {
                if indent > *key_indent {
                    let target = doc.section_slot(section);
                    let mut value = target.raw(key).unwrap_or_default().to_string();
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                    target.set(key.clone(), value);
                    continue;
                }
            }

            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                let name = trimmed[1..trimmed.len() - 1].trim().to_string();
                if name.is_empty() {
                    return Err(Error::configuration(format!(
                        "line {}: empty section name",
                        lineno
                    )));
                }
                open_value = None;
                if name == DEFAULT_SECTION {
                    current = Some(None);
                    continue;
                }
                if doc.has_section(&name) {
                    return Err(Error::configuration(format!(
                        "line {}: section [{}] already exists",
                        lineno, name
                    )));
                }
                doc.sections.push(IniSection {
                    name,
                    entries: Vec::new(),
                });
                current = Some(Some(doc.sections.len() - 1));
                continue;
            }

            let Some(section) = current else {
                return Err(Error::configuration(format!(
                    "line {}: key outside of any section: {}",
                    lineno, trimmed
                )));
            };
            let Some(split_at) = trimmed.find(['=', ':']) else {
                return Err(Error::configuration(format!(
                    "line {}: expected `key = value`, got: {}",
                    lineno, trimmed
                )));
            };
            let key = trimmed[..split_at].trim().to_ascii_lowercase();
            let value = trimmed[split_at + 1..].trim().to_string();
            if key.is_empty() {
                return Err(Error::configuration(format!("line {}: empty key", lineno)));
            }
            let target = doc.section_slot(section);
            if target.raw(&key).is_some() {
                return Err(Error::configuration(format!(
                    "line {}: duplicate key '{}' in section [{}]",
                    lineno,
                    key,
                    target.name()
                )));
            }
            target.set(key.clone(), value);
            open_value = Some((key, indent));
        }

        Ok(doc)
    }

    fn section_slot(&mut self, slot: Option<usize>) -> &mut IniSection {
        match slot {
            Some(idx) => &mut self.sections[idx],
            None => &mut self.defaults,
        }
    }

    /// Section names in declaration order, `DEFAULT` excluded.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    pub fn has_key(&self, section: &str, key: &str) -> bool {
        self.raw(section, key).is_some()
    }

    /// Keys of a section, followed by inherited default keys it does not override.
    pub fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sections
            .iter()
            .find(|s| s.name == section)
            .map(|s| s.entries.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default();
        for (key, _) in &self.defaults.entries {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Uninterpolated value of `key` in `section`, falling back to `[DEFAULT]`.
    pub fn raw(&self, section: &str, key: &str) -> Option<&str> {
        let own = if section == DEFAULT_SECTION {
            None
        } else {
            self.sections
                .iter()
                .find(|s| s.name == section)
                .and_then(|s| s.raw(key))
        };
        own.or_else(|| {
            if section == DEFAULT_SECTION || self.has_section(section) {
                self.defaults.raw(key)
            } else {
                None
            }
        })
    }

    /// Interpolated value, `None` when the section or key does not exist.
    pub fn get(&self, section: &str, key: &str) -> Result<Option<String>> {
        match self.raw(section, key) {
            Some(raw) => self.interpolate(section, raw, 0).map(Some),
            None => Ok(None),
        }
    }

    /// Interpolated value, or an empty string when the key is absent.
    pub fn get_or_empty(&self, section: &str, key: &str) -> Result<String> {
        Ok(self.get(section, key)?.unwrap_or_default())
    }

    /// Interpolated value that must be present.
    pub fn require(&self, section: &str, key: &str) -> Result<String> {
        self.get(section, key)?.ok_or_else(|| {
            Error::configuration(format!("missing key '{}' in section [{}]", key, section))
        })
    }

    /// Boolean value using the usual INI spellings; absent keys yield `default`.
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> Result<bool> {
        let Some(value) = self.get(section, key)? else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => Ok(true),
            "0" | "no" | "false" | "off" => Ok(false),
            other => Err(Error::configuration(format!(
                "[{}] {}: not a boolean: '{}'",
                section, key, other
            ))),
        }
    }

    /// Comma separated list with entries trimmed and empty entries dropped.
    pub fn get_list(&self, section: &str, key: &str) -> Result<Vec<String>> {
        Ok(split_list(&self.get_or_empty(section, key)?))
    }

    fn interpolate(&self, section: &str, raw: &str, depth: usize) -> Result<String> {
        if depth > MAX_INTERPOLATION_DEPTH {
            return Err(Error::configuration(format!(
                "[{}]: interpolation too deep in '{}'",
                section, raw
            )));
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            if let Some(stripped) = after.strip_prefix('$') {
                out.push('$');
                rest = stripped;
            } else if let Some(body) = after.strip_prefix('{') {
                let Some(end) = body.find('}') else {
                    return Err(Error::configuration(format!(
                        "[{}]: unterminated reference in '{}'",
                        section, raw
                    )));
                };
                let reference = &body[..end];
                let (ref_section, ref_key) = match reference.split_once(':') {
                    Some((s, k)) => (s, k),
                    None => (section, reference),
                };
                let value = self.raw(ref_section, ref_key).ok_or_else(|| {
                    Error::configuration(format!(
                        "[{}]: bad reference '${{{}}}' in '{}'",
                        section, reference, raw
                    ))
                })?;
                out.push_str(&self.interpolate(ref_section, value, depth + 1)?);
                rest = &body[end + 1..];
            } else {
                return Err(Error::configuration(format!(
                    "[{}]: '$' must be followed by '$' or '{{' in '{}'",
                    section, raw
                )));
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Split a comma separated configuration value.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
