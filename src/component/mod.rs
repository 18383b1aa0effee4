//! Installable SDK components and their validation.
//!
//! A component is one configuration section in a package namespace:
//!
//! ```text
//! [qt.tools.foo]
//! archives = qt.tools.foo.linux, qt.tools.foo.docs
//! target_install_base = /%QT_VERSION%/gcc_64
//! version = %QT_VERSION%
//! version_tag = %VERSION%
//! package_default = true
//! ```
//!
//! Components start [`ValidationState::Unvalidated`]. [`Component::validate`]
//! moves them to `Valid` or `Invalid` exactly once; later calls do nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdk_packager::component::Component;
//!
//! let mut component = Component::from_section(&doc, "qt.tools.foo", resolver.substitutions())?;
//! component.validate(&doc, &resolver, false)?;
//! if !component.is_valid() {
//!     eprintln!("{}", component.error_message().unwrap_or_default());
//! }
//! ```

pub mod archive;
pub mod catalog;

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{IniDocument, Substitutions};
use crate::error::{Error, Result};
use crate::resolver::ArchiveLocationResolver;

pub use archive::{derive_archive_name, ArchiveDescriptor, FinalizeItem};
pub use catalog::{CatalogOptions, ComponentCatalog, ValidationReport};

/// Placeholder in package metadata replaced by the component's archive names.
pub const ONLINE_ARCHIVE_LIST_TAG: &str = "<!--ONLINE_ARCHIVE_LIST-->";

pub const PACKAGE_DEFAULT_TAG: &str = "%PACKAGE_DEFAULT_TAG%";
pub const INSTALL_PRIORITY_TAG: &str = "%INSTALL_PRIORITY%";
pub const SORTING_PRIORITY_TAG: &str = "%SORTING_PRIORITY%";
pub const TARGET_INSTALL_DIR_NAME_TAG: &str = "%TARGET_INSTALL_DIR%";
pub const COMPONENT_SHA1_TAG: &str = "%COMPONENT_SHA1%";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageDefault {
    True,
    #[default]
    False,
    Script,
}

impl PackageDefault {
    /// Unknown values fall back to `False`.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "true" => PackageDefault::True,
            "script" => PackageDefault::Script,
            _ => PackageDefault::False,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageDefault::True => "true",
            PackageDefault::False => "false",
            PackageDefault::Script => "script",
        }
    }
}

impl fmt::Display for PackageDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationState {
    #[default]
    Unvalidated,
    Valid,
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Component {
    /// Section name with substitutions applied.
    pub name: String,
    /// Section name as written; used for template lookup.
    pub section: String,
    pub static_component: Option<String>,
    pub root_component: bool,
    pub archive_sections: Vec<String>,
    pub archives_extract_dir: String,
    pub archive_server_name: String,
    pub target_install_base: String,
    pub version: String,
    pub version_tag: String,
    pub package_default: PackageDefault,
    pub install_priority: String,
    pub sorting_priority: String,
    pub component_sha1_uri: Option<String>,
    pub component_sha1: Option<String>,
    pub include_filter: String,
    pub optional_for_offline: bool,
    pub archive_skip: bool,
    pub template_dir: Option<PathBuf>,
    pub archives: Vec<ArchiveDescriptor>,
    raw_package_default: String,
    state: ValidationState,
}

impl Component {
    /// Read the component section. Archives are resolved later by [`Component::validate`].
    pub fn from_section(doc: &IniDocument, section: &str, subs: &Substitutions) -> Result<Self> {
        if !doc.has_section(section) {
            return Err(Error::configuration(format!(
                "component section [{}] does not exist",
                section
            )));
        }
        let raw_package_default = doc.get_or_empty(section, "package_default")?;
        let archive_sections = doc
            .get_or_empty(section, "archives")?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .split(',')
            .map(str::to_string)
            .collect::<Vec<_>>();
        let archive_sections = if archive_sections.iter().all(String::is_empty) {
            Vec::new()
        } else {
            archive_sections
        };
        let root = doc.get_or_empty(section, "root_component")?;

        Ok(Self {
            name: subs.apply(section),
            section: section.to_string(),
            static_component: non_empty(doc.get_or_empty(section, "static_component")?),
            root_component: matches!(root.as_str(), "yes" | "true"),
            archive_sections,
            archives_extract_dir: doc.get_or_empty(section, "archives_extract_dir")?,
            archive_server_name: doc.get_or_empty(section, "archive_server_name")?,
            target_install_base: subs.apply(&doc.get_or_empty(section, "target_install_base")?),
            version: subs.apply(&doc.get_or_empty(section, "version")?),
            version_tag: doc.get_or_empty(section, "version_tag")?,
            package_default: PackageDefault::parse(&raw_package_default),
            install_priority: doc.get_or_empty(section, "install_priority")?,
            sorting_priority: doc.get_or_empty(section, "sorting_priority")?,
            component_sha1_uri: non_empty(doc.get_or_empty(section, "component_sha1_uri")?),
            component_sha1: None,
            include_filter: doc.get_or_empty(section, "include_filter")?,
            optional_for_offline: doc.get_bool(section, "optional_for_offline", false)?,
            archive_skip: false,
            template_dir: None,
            archives: Vec::new(),
            raw_package_default,
            state: ValidationState::Unvalidated,
        })
    }

    /// Skip archive reachability checks (dry runs).
    pub fn set_archive_skip(&mut self, skip: bool) {
        self.archive_skip = skip;
    }

    pub fn set_component_sha1(&mut self, sha1: impl Into<String>) {
        self.component_sha1 = non_empty(sha1.into().trim().to_string());
    }

    pub fn state(&self) -> &ValidationState {
        &self.state
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, ValidationState::Valid)
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            ValidationState::Invalid(message) => Some(message),
            _ => None,
        }
    }

    /// Whether an invalid component may be dropped instead of failing the build.
    pub fn is_optional(&self, offline_build: bool) -> bool {
        self.archive_skip || (offline_build && self.optional_for_offline)
    }

    /// Locate the template directory, resolve archives and run the data checks.
    ///
    /// Configuration errors are returned. An unreachable archive URL is
    /// returned as well, unless the component is optional, in which case it
    /// becomes the component's validation message.
    pub fn validate(
        &mut self,
        doc: &IniDocument,
        resolver: &ArchiveLocationResolver,
        offline_build: bool,
    ) -> Result<()> {
        if self.state != ValidationState::Unvalidated {
            debug!("{}: already validated", self.name);
            return Ok(());
        }

        self.template_dir = self.find_template_dir(&resolver.template_search_paths());

        if let Err(err) = self.resolve_archives(doc, resolver) {
            return match err {
                Error::UnreachableUrl { .. } if self.is_optional(offline_build) => {
                    self.fail(err.to_string());
                    Ok(())
                }
                err => {
                    self.state = ValidationState::Invalid(err.to_string());
                    Err(err)
                }
            };
        }

        self.state = match self.check_component_data(resolver) {
            Some(message) => ValidationState::Invalid(sanity_message(&self.name, &message)),
            None => ValidationState::Valid,
        };
        Ok(())
    }

    fn fail(&mut self, message: String) {
        self.state = ValidationState::Invalid(sanity_message(&self.name, &message));
    }

    fn find_template_dir(&self, search_paths: &[PathBuf]) -> Option<PathBuf> {
        let mut found: Option<PathBuf> = None;
        for base in search_paths {
            let candidate = base.join(&self.section);
            if !candidate.exists() {
                continue;
            }
            match &found {
                None => found = Some(candidate),
                Some(used) => {
                    warn!(
                        "duplicate template for {}: ignoring {}, using {}",
                        self.name,
                        candidate.display(),
                        used.display()
                    );
                }
            }
        }
        found
    }

    fn resolve_archives(&mut self, doc: &IniDocument, resolver: &ArchiveLocationResolver) -> Result<()> {
        if let Some(uri) = self.component_sha1_uri.take() {
            let resolved = resolver.resolve_full_uri(&self.name, &self.archive_server_name, &uri);
            self.component_sha1_uri = Some(resolved?);
        }
        for section in &self.archive_sections {
            if section.is_empty() {
                warn!("[{}]: archive list has an empty entry", self.name);
                continue;
            }
            let archive = ArchiveDescriptor::from_section(
                doc,
                section,
                &self.name,
                &self.archive_server_name,
                resolver,
            )?;
            self.archives.push(archive);
        }
        Ok(())
    }

    /// First failing data check, in a fixed order.
    fn check_component_data(&mut self, resolver: &ArchiveLocationResolver) -> Option<String> {
        if let Some(path) = &self.static_component {
            if !Path::new(path).is_file() {
                return Some(format!("Unable to locate given static package: {}", path));
            }
            return None;
        }
        if self.name.is_empty() {
            return Some("Undefined package name?".to_string());
        }
        if !self.archive_sections.is_empty() && self.target_install_base.is_empty() {
            return Some("Undefined target_install_base?".to_string());
        }
        if !self.version.is_empty() && self.version_tag.is_empty() {
            return Some("Undefined version_tag?".to_string());
        }
        if !self.version_tag.is_empty() && self.version.is_empty() {
            return Some("Undefined version?".to_string());
        }
        if !matches!(self.raw_package_default.as_str(), "true" | "false" | "script") {
            self.package_default = PackageDefault::False;
        }
        match &self.template_dir {
            Some(dir) if dir.exists() => {}
            other => {
                let shown = other
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                return Some(format!("Package template dir does not exist: {}", shown));
            }
        }
        if !self.archive_skip {
            for archive in &self.archives {
                if let Some(message) = archive.check_reachability(resolver.probe()) {
                    return Some(message);
                }
            }
        }
        None
    }

    /// `(ONLINE_ARCHIVE_LIST_TAG, "a.7z, b.7z")` for package metadata.
    pub fn generate_downloadable_archive_list(&self) -> (String, String) {
        let names = self
            .archives
            .iter()
            .map(|a| a.archive_name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        (ONLINE_ARCHIVE_LIST_TAG.to_string(), names)
    }

    /// Tag replacements for the component's package metadata.
    pub fn metadata_substitutions(&self) -> Substitutions {
        let mut subs = Substitutions::new();
        if !self.version_tag.is_empty() {
            subs.push(self.version_tag.as_str(), self.version.as_str());
        }
        subs.push(PACKAGE_DEFAULT_TAG, self.package_default.as_str());
        if !self.install_priority.is_empty() {
            subs.push(INSTALL_PRIORITY_TAG, self.install_priority.as_str());
        }
        if !self.sorting_priority.is_empty() {
            subs.push(SORTING_PRIORITY_TAG, self.sorting_priority.as_str());
        }
        if !self.target_install_base.is_empty() {
            subs.push(TARGET_INSTALL_DIR_NAME_TAG, self.target_install_base.as_str());
        }
        if let Some(sha1) = &self.component_sha1 {
            subs.push(COMPONENT_SHA1_TAG, sha1.as_str());
        }
        subs
    }

    /// Whether the component belongs in an installer of `license_type`.
    pub fn matches_license(&self, license_type: &str) -> bool {
        self.include_filter.is_empty() || license_type.contains(self.include_filter.as_str())
    }

    pub fn log_summary(&self) {
        debug!("[{}]", self.name);
        if let Some(path) = &self.static_component {
            debug!("  static component: {}", path);
            return;
        }
        debug!("  target install base: {}", self.target_install_base);
        debug!("  version: {} ({})", self.version, self.version_tag);
        debug!("  package default: {}", self.package_default);
        for archive in &self.archives {
            debug!(
                "  archive {} -> {} (strip {}) from {}",
                archive.archive_name,
                archive.installation_directory(&self.target_install_base),
                archive.package_strip_dirs,
                archive.archive_uri
            );
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn sanity_message(component: &str, message: &str) -> String {
    format!(
        "*** Sanity check fail! ***\n*** Component: [{}]\n*** {}",
        component, message
    )
}
