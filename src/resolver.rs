//! Archive URI resolution.
//!
//! A component lists its archives by a raw URI that may be a file in a
//! package template tree, an absolute URL, or a path relative to one of the
//! configured archive servers. [`ArchiveLocationResolver::resolve_full_uri`]
//! turns it into the single location that packaging downloads from.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdk_packager::resolver::{ArchiveLocationResolver, HttpProbe};
//!
//! let resolver = ArchiveLocationResolver::from_config(&doc, None, config_root, subs, Box::new(HttpProbe::new()?))?;
//! let uri = resolver.resolve_full_uri("qt.tools.foo", "ci", "foo/%VERSION%/foo.7z")?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::Url;
use tracing::debug;

use crate::config::{IniDocument, Substitutions};
use crate::error::{Error, Result};
use crate::server::{join_url, ServerRegistry};

/// Directory under the configurations root that holds package templates.
pub const PKG_TEMPLATE_BASE_DIR_NAME: &str = "pkg_templates";

const TEMPLATES_SECTION: &str = "PackageTemplates";
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Answers whether a URI points at downloadable, non-empty content.
pub trait ContentProbe {
    fn is_content_valid(&self, uri: &str) -> bool;
}

/// True when `uri` parses as a URL with both a scheme and a host.
pub fn is_absolute_url(uri: &str) -> bool {
    Url::parse(uri)
        .map(|url| !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Accepts existing local files only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProbe;

impl ContentProbe for LocalProbe {
    fn is_content_valid(&self, uri: &str) -> bool {
        Path::new(uri).is_file()
    }
}

/// Accepts existing local files and HTTP(S) URLs that report a positive size.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|source| Error::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }

    fn remote_size(&self, url: &str) -> Option<u64> {
        let head = self.client.head(url).send().ok()?;
        if head.status().is_success() {
            if let Some(len) = header_content_length(head.headers()).filter(|len| *len > 0) {
                return Some(len);
            }
        }
        // Some servers omit Content-Length on HEAD; ask for the first byte.
        let response = self.client.get(url).header(RANGE, "bytes=0-0").send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        content_range_total(response.headers()).or_else(|| header_content_length(response.headers()))
    }
}

/// `Content-Length` as sent by the server.
fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Total size from `Content-Range: bytes 0-0/<total>`.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

impl ContentProbe for HttpProbe {
    fn is_content_valid(&self, uri: &str) -> bool {
        if Path::new(uri).is_file() {
            return true;
        }
        let Ok(url) = Url::parse(uri) else {
            return false;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let size = self.remote_size(uri);
        debug!("probed {}: {:?}", uri, size);
        size.is_some_and(|s| s > 0)
    }
}

pub struct ArchiveLocationResolver {
    registry: ServerRegistry,
    configurations_root: PathBuf,
    template_dirs: Vec<String>,
    substitutions: Substitutions,
    probe: Box<dyn ContentProbe + Send + Sync>,
}

impl ArchiveLocationResolver {
    pub fn new(
        registry: ServerRegistry,
        configurations_root: impl Into<PathBuf>,
        template_dirs: Vec<String>,
        substitutions: Substitutions,
        probe: Box<dyn ContentProbe + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            configurations_root: configurations_root.into(),
            template_dirs,
            substitutions,
            probe,
        }
    }

    /// Build from a target configuration. `[PackageTemplates] template_dirs`
    /// is mandatory.
    pub fn from_config(
        doc: &IniDocument,
        override_base_url: Option<&str>,
        configurations_root: impl Into<PathBuf>,
        substitutions: Substitutions,
        probe: Box<dyn ContentProbe + Send + Sync>,
    ) -> Result<Self> {
        let template_dirs = parse_template_dirs(&doc.require(TEMPLATES_SECTION, "template_dirs")?);
        let registry = ServerRegistry::from_config(doc, override_base_url)?;
        Ok(Self::new(
            registry,
            configurations_root,
            template_dirs,
            substitutions,
            probe,
        ))
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn substitutions(&self) -> &Substitutions {
        &self.substitutions
    }

    pub fn probe(&self) -> &dyn ContentProbe {
        self.probe.as_ref()
    }

    pub fn configurations_root(&self) -> &Path {
        &self.configurations_root
    }

    /// Existing template directories in declaration order.
    ///
    /// `<root>/pkg_templates/<dir>` is preferred; `<root>/<dir>` is used when
    /// the former does not exist.
    pub fn template_search_paths(&self) -> Vec<PathBuf> {
        self.template_dirs
            .iter()
            .filter_map(|subdir| {
                let preferred = self
                    .configurations_root
                    .join(PKG_TEMPLATE_BASE_DIR_NAME)
                    .join(subdir);
                if preferred.is_dir() {
                    return Some(preferred);
                }
                let fallback = self.configurations_root.join(subdir);
                fallback.is_dir().then_some(fallback)
            })
            .collect()
    }

    /// Resolve the download location of one archive.
    ///
    /// Order: substitutions, package template file, reachable URI as-is,
    /// absolute URL failure, server URL composition.
    pub fn resolve_full_uri(&self, component: &str, server: &str, raw_uri: &str) -> Result<String> {
        let uri = self.substitutions.apply(raw_uri);

        for dir in self.template_search_paths() {
            let candidate = dir.join(component).join("data").join(&uri);
            if candidate.is_file() {
                let resolved = candidate.canonicalize().unwrap_or(candidate);
                debug!("{}: archive {} found in templates", component, uri);
                return Ok(resolved.to_string_lossy().into_owned());
            }
        }

        if self.probe.is_content_valid(&uri) {
            return Ok(uri);
        }

        if is_absolute_url(&uri) {
            return Err(Error::UnreachableUrl { url: uri });
        }

        let server_url = self.registry.resolve(server)?;
        Ok(join_url(&server_url, &uri))
    }
}

fn parse_template_dirs(value: &str) -> Vec<String> {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .split(',')
        .filter(|d| !d.is_empty())
        .map(|d| d.trim_end_matches('/').to_string())
        .collect()
}
