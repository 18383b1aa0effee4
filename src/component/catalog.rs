//! Batch parsing and validation of every component in a target configuration.
//!
//! Sections whose first dot-separated part is one of the package namespaces
//! become components. Extra configuration files listed in
//! `[PackageConfigurationFiles] file_list` are parsed the same way.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::Component;
use crate::config::IniDocument;
use crate::error::{Error, Result};
use crate::resolver::ArchiveLocationResolver;

const NAMESPACE_SECTION: &str = "PackageNamespace";
const IGNORE_SECTION: &str = "PackageIgnoreList";
const EXTRA_FILES_SECTION: &str = "PackageConfigurationFiles";

#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    pub namespaces: Vec<String>,
    pub license_type: String,
    pub offline: bool,
    pub strict: bool,
    /// Skip archive reachability checks.
    pub dry_run: bool,
}

impl CatalogOptions {
    /// Namespaces come from `[PackageNamespace] name` of the main target configuration.
    pub fn from_config(doc: &IniDocument) -> Result<Self> {
        Ok(Self {
            namespaces: doc.get_list(NAMESPACE_SECTION, "name")?,
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedComponent {
    pub name: String,
    pub message: String,
    pub optional: bool,
}

/// Outcome of a catalog run, suitable for printing as JSON.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub included: Vec<String>,
    pub excluded_by_license: Vec<String>,
    pub skipped: Vec<SkippedComponent>,
    pub ignored: Vec<String>,
}

impl ValidationReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Default)]
pub struct ComponentCatalog {
    components: Vec<Component>,
    skipped: Vec<Component>,
    report: ValidationReport,
    ignore_list: Vec<String>,
    visited: HashSet<PathBuf>,
}

impl ComponentCatalog {
    /// Validate the components of a single document.
    pub fn parse(
        doc: &IniDocument,
        resolver: &ArchiveLocationResolver,
        options: &CatalogOptions,
    ) -> Result<Self> {
        let mut catalog = Self::default();
        let mut failures = Vec::new();
        catalog.add_document(doc, resolver, options, &mut failures)?;
        catalog.finish(options, failures)
    }

    /// Validate the components of `path` and of every extra file it lists.
    ///
    /// Extra files are looked up as given, then by name below `search_root`.
    pub fn load(
        path: &Path,
        search_root: &Path,
        resolver: &ArchiveLocationResolver,
        options: &CatalogOptions,
    ) -> Result<Self> {
        let mut catalog = Self::default();
        let mut failures = Vec::new();
        catalog.add_file(path, search_root, resolver, options, &mut failures)?;
        catalog.finish(options, failures)
    }

    fn add_file(
        &mut self,
        path: &Path,
        search_root: &Path,
        resolver: &ArchiveLocationResolver,
        options: &CatalogOptions,
        failures: &mut Vec<String>,
    ) -> Result<()> {
        let full_path = locate_config_file(path, search_root)?;
        if !self.visited.insert(full_path.clone()) {
            warn!("configuration {} already parsed, skipping", full_path.display());
            return Ok(());
        }
        info!("reading target configuration: {}", full_path.display());
        let doc = IniDocument::load(&full_path)?;
        self.add_document(&doc, resolver, options, failures)?;

        for extra in doc.get_list(EXTRA_FILES_SECTION, "file_list")? {
            self.add_file(Path::new(&extra), search_root, resolver, options, failures)?;
        }
        Ok(())
    }

    fn add_document(
        &mut self,
        doc: &IniDocument,
        resolver: &ArchiveLocationResolver,
        options: &CatalogOptions,
        failures: &mut Vec<String>,
    ) -> Result<()> {
        for name in doc.get_list(IGNORE_SECTION, "packages")? {
            if !self.ignore_list.contains(&name) {
                self.ignore_list.push(name);
            }
        }

        for section in doc.section_names() {
            let namespace = section.split('.').next().unwrap_or_default();
            if !options.namespaces.iter().any(|n| n == namespace) {
                continue;
            }
            if self.ignore_list.iter().any(|i| i == section) {
                self.report.ignored.push(section.to_string());
                continue;
            }

            let mut component = Component::from_section(doc, section, resolver.substitutions())?;
            if options.dry_run {
                component.set_archive_skip(true);
            }
            component.validate(doc, resolver, options.offline)?;
            component.log_summary();

            if component.is_valid() {
                if component.matches_license(&options.license_type) {
                    self.report.included.push(component.name.clone());
                    self.components.push(component);
                } else {
                    self.report.excluded_by_license.push(component.name.clone());
                }
                continue;
            }

            let message = component.error_message().unwrap_or_default().to_string();
            let optional = options.offline && component.optional_for_offline;
            if optional {
                warn!(
                    "{} is not valid but optional for offline installers, skipping it",
                    component.name
                );
            } else if options.strict {
                failures.push(message.clone());
            } else {
                warn!("ignored component in non-strict mode: {}\n{}", section, message);
            }
            self.report.skipped.push(SkippedComponent {
                name: component.name.clone(),
                message,
                optional,
            });
            self.skipped.push(component);
        }
        Ok(())
    }

    fn finish(self, options: &CatalogOptions, failures: Vec<String>) -> Result<Self> {
        if options.strict && !failures.is_empty() {
            return Err(Error::Packaging(failures.join("\n")));
        }
        Ok(self)
    }

    /// Valid components matching the license type, in configuration order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn skipped(&self) -> &[Component] {
        &self.skipped
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn into_components(self) -> Vec<Component> {
        self.components
    }
}

fn locate_config_file(path: &Path, search_root: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let direct = search_root.join(path);
    if direct.is_file() {
        return Ok(direct);
    }
    if let Some(name) = path.file_name() {
        let found = WalkDir::new(search_root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.file_type().is_file() && entry.file_name() == name);
        if let Some(entry) = found {
            return Ok(entry.into_path());
        }
    }
    Err(Error::configuration(format!(
        "unable to locate configuration file {} under {}",
        path.display(),
        search_root.display()
    )))
}
