//! Release tasks read from the top-level release configuration.
//!
//! Every section whose name starts with `task` describes one job, e.g.
//! `[task.repository.linux.x86_64]`. The second dot separated part is the
//! task kind. Task filters select sections by their name parts.
//!
//! # Example
//!
//! ```rust,ignore
//! let doc = IniDocument::load(Path::new("release.ini"))?;
//! for task in parse_tasks(&doc, &["repository,linux".to_string()])? {
//!     println!("{} -> {}", task.name, task.repo_path);
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::config::{split_list, IniDocument};
use crate::error::{Error, Result};

const COMMON_SUBSTITUTIONS_SECTION: &str = "common.substitutions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Repository,
    Offline,
    Online,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTask {
    pub name: String,
    pub config_file: String,
    pub project_name: String,
    pub version: String,
    pub prerelease_version: String,
    /// Raw `substitutions` value.
    pub substitutions: String,
    pub repo_path: String,
    pub repo_components_to_update: String,
    pub installer_name: String,
    pub rta_key_list: String,
    /// Task substitutions followed by the common ones.
    pub substitution_list: Vec<String>,
    /// Locally built online repository, filled by [`crate::publish::prepare_task_sources`].
    pub source_online_repository_path: Option<PathBuf>,
    pub source_pkg_path: Option<PathBuf>,
}

impl ReleaseTask {
    pub fn from_section(doc: &IniDocument, section: &str) -> Result<Self> {
        if section.split('.').count() < 3 {
            return Err(Error::ReleaseTask(format!(
                "The '[{}]' has too few dot separated elements!",
                section
            )));
        }
        let config_file = doc.get(section, "config_file")?.ok_or_else(|| {
            Error::ReleaseTask(format!("[{}] is missing 'config_file'", section))
        })?;
        let substitutions = doc.get_or_empty(section, "substitutions")?;
        Ok(Self {
            name: section.to_string(),
            config_file,
            project_name: doc.get_or_empty(section, "project_name")?,
            version: doc.get_or_empty(section, "version")?,
            prerelease_version: doc.get_or_empty(section, "prerelease_version")?.trim().to_string(),
            substitution_list: split_list(&substitutions),
            substitutions,
            repo_path: doc.get_or_empty(section, "repo_path")?,
            repo_components_to_update: doc.get_or_empty(section, "repo_components_to_update")?,
            installer_name: doc.get_or_empty(section, "installer_name")?,
            rta_key_list: doc.get_or_empty(section, "rta_key_list")?,
            source_online_repository_path: None,
            source_pkg_path: None,
        })
    }

    pub fn kind(&self) -> TaskKind {
        match self.name.split('.').nth(1) {
            Some("repository") => TaskKind::Repository,
            Some("offline") => TaskKind::Offline,
            Some("online") => TaskKind::Online,
            _ => TaskKind::Other,
        }
    }

    pub fn is_repository_task(&self) -> bool {
        self.kind() == TaskKind::Repository
    }

    pub fn is_offline_installer_task(&self) -> bool {
        self.kind() == TaskKind::Offline
    }

    pub fn is_online_installer_task(&self) -> bool {
        self.kind() == TaskKind::Online
    }

    pub fn add_substitutions(&mut self, substitutions: &[String]) {
        self.substitution_list.extend(substitutions.iter().cloned());
    }

    /// RTA job keys with all whitespace removed.
    pub fn get_rta_key_list(&self) -> Vec<String> {
        self.rta_key_list
            .split(',')
            .map(|key| key.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|key| !key.is_empty())
            .collect()
    }
}

static FILTER_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new("[, ;:]+").unwrap());

/// Split one task filter into its name parts.
pub fn get_filter_parts(filter: &str) -> Vec<String> {
    FILTER_SEPARATOR
        .split(filter)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tasks of `doc` matching any of `filters`; no filters select every task.
pub fn parse_tasks(doc: &IniDocument, filters: &[String]) -> Result<Vec<ReleaseTask>> {
    let common = if doc.has_section(COMMON_SUBSTITUTIONS_SECTION) {
        doc.get_list(COMMON_SUBSTITUTIONS_SECTION, "substitutions")?
    } else {
        Vec::new()
    };
    let filter_parts: Vec<Vec<String>> = filters.iter().map(|f| get_filter_parts(f)).collect();

    let mut tasks = Vec::new();
    for section in doc.section_names() {
        let parts: Vec<&str> = section.split('.').collect();
        if !parts[0].starts_with("task") {
            continue;
        }
        let included = filter_parts.is_empty()
            || filter_parts
                .iter()
                .any(|wanted| wanted.iter().all(|w| parts.contains(&w.as_str())));
        if !included {
            info!(
                "Skipping task: [{}] - not included by task filter(s): {:?}",
                section, filter_parts
            );
            continue;
        }
        info!("Parsing Task: {}", section);
        let mut task = ReleaseTask::from_section(doc, section)?;
        task.add_substitutions(&common);
        tasks.push(task);
    }
    Ok(tasks)
}

/// Load the release configuration and parse its tasks.
pub fn parse_config(path: &Path, filters: &[String]) -> Result<Vec<ReleaseTask>> {
    if !path.is_file() {
        return Err(Error::ReleaseTask(format!("Not such file: {}", path.display())));
    }
    parse_tasks(&IniDocument::load(path)?, filters)
}

/// Prefix every filter with `filter`; an empty list becomes `[filter]`.
pub fn append_to_task_filters(filters: &[String], filter: &str) -> Vec<String> {
    if filters.is_empty() {
        return vec![filter.to_string()];
    }
    filters
        .iter()
        .map(|existing| {
            if existing.is_empty() {
                filter.to_string()
            } else {
                format!("{},{}", filter, existing)
            }
        })
        .collect()
}

/// Accept `offline.linux` style filters by turning dots into commas.
pub fn format_task_filters(filters: &[String]) -> Vec<String> {
    filters.iter().map(|f| f.replace('.', ",")).collect()
}

pub fn string_to_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "y" | "1" => Ok(true),
        "no" | "false" | "n" | "0" => Ok(false),
        _ => Err(Error::configuration(format!(
            "Unable to convert to boolean: {}",
            value
        ))),
    }
}

/// Split `<login>@<server>:/base/path` into login and absolute path.
pub fn parse_ext(ext: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = ext.split(':').collect();
    let [login, path] = parts.as_slice() else {
        return Err(Error::packaging(format!(
            "Ext format should be '<login>@<server>:/base/path'. Format was invalid: {}",
            ext
        )));
    };
    if !path.starts_with('/') {
        return Err(Error::packaging(format!(
            "Ext server path should start with '/'. Format was invalid: {}",
            path
        )));
    }
    Ok((login.to_string(), path.to_string()))
}
