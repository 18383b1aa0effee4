//! Named archive servers read from `[ArchiveRemoteLocation.<name>]` sections.
//!
//! ```text
//! [ArchiveRemoteLocation.ci]
//! base_url = http://ci.example.com
//! base_path = /packages/qt
//! ```
//!
//! registers server `ci` with URL `http://ci.example.com/packages/qt/release`.

use tracing::info;

use crate::config::IniDocument;
use crate::error::{Error, Result};

/// Section prefix that declares an archive server.
pub const SERVER_NAMESPACE: &str = "ArchiveRemoteLocation";

/// Segment appended to a configured base path.
pub const RELEASE_SEGMENT: &str = "release";

/// Name given to the single server created from a base URL override.
pub const DEFAULT_SERVER_NAME: &str = "default";

/// Join two URL or path fragments with exactly one `/` between them.
///
/// An empty fragment on either side leaves the other one untouched.
pub fn join_url(base: &str, tail: &str) -> String {
    if base.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), tail.trim_start_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    name: String,
    base_url: String,
    base_path: String,
    full_url: String,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, base_path: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_path = base_path.into();
        let full_url = join_url(&base_url, &base_path);
        Self {
            name: name.into(),
            base_url,
            base_path,
            full_url,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn full_url(&self) -> &str {
        &self.full_url
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerRegistry {
    servers: Vec<ServerDescriptor>,
}

impl ServerRegistry {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        Self { servers }
    }

    /// Build the registry from configuration.
    ///
    /// A non-empty `override_base_url` replaces every configured server with
    /// a single one named [`DEFAULT_SERVER_NAME`].
    pub fn from_config(doc: &IniDocument, override_base_url: Option<&str>) -> Result<Self> {
        if let Some(url) = override_base_url.filter(|u| !u.is_empty()) {
            return Ok(Self::new(vec![ServerDescriptor::new(DEFAULT_SERVER_NAME, url, "")]));
        }

        let mut servers = Vec::new();
        for section in doc.section_names() {
            if !section.starts_with(SERVER_NAMESPACE) {
                continue;
            }
            let name = section.rsplit('.').next().unwrap_or(section);
            let base_url = doc.get_or_empty(section, "base_url")?;
            let mut base_path: String = doc
                .get_or_empty(section, "base_path")?
                .chars()
                .filter(|c| *c != ' ')
                .collect();
            if !base_path.is_empty() {
                base_path = join_url(&base_path, RELEASE_SEGMENT);
            }
            servers.push(ServerDescriptor::new(name, base_url, base_path));
        }
        Ok(Self::new(servers))
    }

    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    /// The implicit default: the only server, when exactly one is registered.
    pub fn default_server(&self) -> Option<&ServerDescriptor> {
        match self.servers.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Full URL of the named server. An empty name selects the default
    /// server, or yields an empty string when there is none.
    pub fn resolve(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Ok(self
                .default_server()
                .map(|s| s.full_url().to_string())
                .unwrap_or_default());
        }
        self.servers
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.full_url().to_string())
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))
    }

    /// `name -> url` per server, the default one marked.
    pub fn server_list(&self) -> Vec<String> {
        let default = self.default_server().map(ServerDescriptor::name);
        self.servers
            .iter()
            .map(|server| {
                let marker = if Some(server.name()) == default { " (default)" } else { "" };
                format!("{} -> {}{}", server.name(), server.full_url(), marker)
            })
            .collect()
    }

    pub fn log_servers(&self) {
        info!("archive servers: {}", self.servers.len());
        for line in self.server_list() {
            info!("  {}", line);
        }
    }
}
