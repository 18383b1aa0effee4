//! Directory layout of the repository host.
//!
//! `<root>/<license>/<pending|staging|production>/<repo_domain>`, e.g.
//! `/data/online_repositories/opensource/staging/qtsdkrepository`.

use tracing::info;

use crate::remote::remote_join;

const PENDING: &str = "pending";
const STAGING: &str = "staging";
const PRODUCTION: &str = "production";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLayout {
    root: String,
    license: String,
    repo_domain: String,
}

impl RepositoryLayout {
    pub fn new(root: impl Into<String>, license: impl Into<String>, repo_domain: impl Into<String>) -> Self {
        let layout = Self {
            root: root.into(),
            license: license.into(),
            repo_domain: repo_domain.into(),
        };
        info!(
            "repository layout: root={} license={} domain={}",
            layout.root, layout.license, layout.repo_domain
        );
        layout
    }

    pub fn license(&self) -> &str {
        &self.license
    }

    pub fn repo_domain(&self) -> &str {
        &self.repo_domain
    }

    pub fn base_repo_path(&self) -> String {
        remote_join(&self.root, &self.license)
    }

    fn area(&self, area: &str) -> String {
        remote_join(&remote_join(&self.base_repo_path(), area), &self.repo_domain)
    }

    pub fn pending_path(&self) -> String {
        self.area(PENDING)
    }

    pub fn staging_path(&self) -> String {
        self.area(STAGING)
    }

    pub fn production_path(&self) -> String {
        self.area(PRODUCTION)
    }

    /// The pending, staging and production directories.
    pub fn repo_layout(&self) -> Vec<String> {
        vec![self.pending_path(), self.staging_path(), self.production_path()]
    }
}
