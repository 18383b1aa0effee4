//! One downloadable archive of a component, read from its own config section.
//!
//! ```text
//! [qt.tools.foo.linux]
//! archive_uri = /qt/%QT_VERSION%/foo-linux.tar.gz
//! target_install_dir = /Tools/foo
//! package_strip_dirs = 1
//! package_finalize_items = set_executable=bin/foo, patch_qt
//! ```

use std::path::Path;

use crate::config::IniDocument;
use crate::error::{Error, Result};
use crate::resolver::{ArchiveLocationResolver, ContentProbe};
use crate::server::join_url;

/// Every derived archive name ends with this extension.
pub const CANONICAL_ARCHIVE_EXTENSION: &str = ".7z";

/// Extensions dropped from the URI leaf before [`CANONICAL_ARCHIVE_EXTENSION`] is added.
pub const KNOWN_ARCHIVE_EXTENSIONS: &[&str] = &[
    ".tar.gz", ".tar.xz", ".tar.bz2", ".tgz", ".tar", ".zip", ".7z",
];

/// A post-extraction action such as `set_executable=bin/tool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeItem {
    pub action: String,
    pub argument: Option<String>,
}

impl FinalizeItem {
    pub fn parse_list(value: &str) -> Vec<FinalizeItem> {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.split_once('=') {
                Some((action, argument)) => FinalizeItem {
                    action: action.trim().to_string(),
                    argument: Some(argument.trim().to_string()),
                },
                None => FinalizeItem {
                    action: item.to_string(),
                    argument: None,
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDescriptor {
    pub section: String,
    /// URI as written in configuration, before resolution.
    pub raw_uri: String,
    /// Resolved download location.
    pub archive_uri: String,
    pub archive_action: String,
    pub extract_archive: bool,
    pub package_strip_dirs: u32,
    pub finalize_items: Vec<FinalizeItem>,
    pub target_install_base: Option<String>,
    pub target_install_dir: String,
    pub rpath_target: Option<String>,
    pub component_sha1_file: Option<String>,
    pub archive_name: String,
}

impl ArchiveDescriptor {
    /// Read `section` and resolve its `archive_uri` for `component`.
    pub fn from_section(
        doc: &IniDocument,
        section: &str,
        component: &str,
        server: &str,
        resolver: &ArchiveLocationResolver,
    ) -> Result<Self> {
        if !doc.has_section(section) {
            return Err(Error::configuration(format!(
                "archive section [{}] referenced by {} does not exist",
                section, component
            )));
        }
        let raw_uri = doc.require(section, "archive_uri")?;
        let archive_uri = resolver.resolve_full_uri(component, server, &raw_uri)?;
        let subs = resolver.substitutions();

        let strip = doc.get_or_empty(section, "package_strip_dirs")?;
        let package_strip_dirs = if strip.trim().is_empty() {
            0
        } else {
            strip.trim().parse::<u32>().map_err(|_| {
                Error::configuration(format!(
                    "[{}] package_strip_dirs is not a number: '{}'",
                    section, strip
                ))
            })?
        };

        let archive_name = match doc.get_or_empty(section, "archive_name")? {
            name if name.is_empty() => derive_archive_name(&archive_uri),
            name => name,
        };

        Ok(Self {
            section: section.to_string(),
            raw_uri,
            archive_uri,
            archive_action: doc.get_or_empty(section, "archive_action")?,
            extract_archive: doc.get_bool(section, "extract_archive", true)?,
            package_strip_dirs,
            finalize_items: FinalizeItem::parse_list(
                &doc.get_or_empty(section, "package_finalize_items")?,
            ),
            target_install_base: non_empty(subs.apply(&doc.get_or_empty(section, "target_install_base")?)),
            target_install_dir: subs
                .apply(&doc.get_or_empty(section, "target_install_dir")?)
                .trim_start_matches(['/', '\\'])
                .to_string(),
            rpath_target: non_empty(doc.get_or_empty(section, "rpath_target")?),
            component_sha1_file: non_empty(doc.get_or_empty(section, "component_sha1_file")?),
            archive_name: subs.apply(&archive_name),
        })
    }

    /// Failure message when the resolved archive cannot be found.
    pub fn check_reachability(&self, probe: &dyn ContentProbe) -> Option<String> {
        let found = if self.archive_uri.starts_with("http") {
            probe.is_content_valid(&self.archive_uri)
        } else {
            Path::new(&self.archive_uri).is_file()
        };
        (!found).then(|| {
            format!(
                "*** Archive check fail! ***\n*** Unable to locate archive: {}",
                self.archive_uri
            )
        })
    }

    /// Directory the archive content is installed into.
    pub fn installation_directory(&self, parent_install_base: &str) -> String {
        let base = self
            .target_install_base
            .as_deref()
            .unwrap_or(parent_install_base);
        join_url(base, &self.target_install_dir)
    }

    /// Arguments of every finalize item with the given action.
    pub fn finalize_arguments<'a>(&'a self, action: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.finalize_items
            .iter()
            .filter(move |item| item.action == action)
            .filter_map(|item| item.argument.as_deref())
    }

    /// False when the archive can be copied into the package verbatim.
    pub fn requires_repackaging(&self, parent_install_base: &str) -> bool {
        let raw_name = uri_leaf(&self.archive_uri);
        !(raw_name.ends_with(CANONICAL_ARCHIVE_EXTENSION)
            && self.package_strip_dirs == 0
            && self.finalize_items.is_empty()
            && self.archive_action.is_empty()
            && self.rpath_target.is_none()
            && self.target_install_base.as_deref().unwrap_or(parent_install_base) == "/"
            && self.target_install_dir.is_empty()
            && raw_name == self.archive_name)
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Last path segment of a URI or path, `/` or `\` separated.
fn uri_leaf(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

/// Archive name derived from a URI: leaf, known extensions stripped, `.7z` appended.
pub fn derive_archive_name(uri: &str) -> String {
    let mut name = uri_leaf(uri).to_string();
    loop {
        let Some(ext) = KNOWN_ARCHIVE_EXTENSIONS
            .iter()
            .find(|ext| name.len() > ext.len() && name.ends_with(*ext))
        else {
            break;
        };
        name.truncate(name.len() - ext.len());
    }
    if !name.ends_with(CANONICAL_ARCHIVE_EXTENSION) {
        name.push_str(CANONICAL_ARCHIVE_EXTENSION);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Substitutions;
    use crate::resolver::tests::FakeProbe;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(root: &Path, valid: &[&str]) -> ArchiveLocationResolver {
        let doc = IniDocument::parse(
            "[PackageTemplates]\ntemplate_dirs = common\n\
             [ArchiveRemoteLocation.ci]\nbase_url = http://ci.example.com\n",
        )
        .unwrap();
        let mut subs = Substitutions::new();
        subs.push("%VER%", "6.5.0");
        ArchiveLocationResolver::from_config(&doc, None, root, subs, Box::new(FakeProbe::accepting(valid)))
            .unwrap()
    }

    #[test]
    fn test_derive_archive_name() {
        assert_eq!(derive_archive_name("http://x/a/foo.tar.gz"), "foo.7z");
        assert_eq!(derive_archive_name("http://x/a/foo.7z"), "foo.7z");
        assert_eq!(derive_archive_name("C:\\a\\foo.zip"), "foo.7z");
        assert_eq!(derive_archive_name("foo.tar.7z"), "foo.7z");
        assert_eq!(derive_archive_name("dir/foo/"), "foo.7z");
        assert_eq!(derive_archive_name("qt-6.5.0-linux"), "qt-6.5.0-linux.7z");
        assert_eq!(derive_archive_name("http://x/a/.7z"), ".7z");
        assert_eq!(derive_archive_name(".tar.gz.7z"), ".tar.gz.7z");
        for uri in ["a.7z.7z", "b.tar.xz", "c.tgz", "d.tar.bz2", "e"] {
            let name = derive_archive_name(uri);
            assert!(name.ends_with(".7z"));
            assert!(!name.trim_end_matches(".7z").ends_with(".7z"), "{}", name);
        }
    }

    #[test]
    fn test_finalize_items() {
        let items = FinalizeItem::parse_list("set_executable=bin/a, patch_qt,set_executable = bin/b,");
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], FinalizeItem { action: "patch_qt".into(), argument: None });
    }

    #[test]
    fn test_from_section_resolves_and_substitutes() {
        let temp = TempDir::new().unwrap();
        let doc = IniDocument::parse(
            "[foo.archive]\narchive_uri = qt/%VER%/foo.tar.gz\ntarget_install_dir = /Tools/%VER%\n\
             package_strip_dirs = 2\npackage_finalize_items = set_executable=bin/foo\n",
        )
        .unwrap();
        let resolver = resolver(temp.path(), &[]);
        let archive = ArchiveDescriptor::from_section(&doc, "foo.archive", "qt.foo", "ci", &resolver).unwrap();

        assert_eq!(archive.archive_uri, "http://ci.example.com/qt/6.5.0/foo.tar.gz");
        assert_eq!(archive.archive_name, "foo.7z");
        assert_eq!(archive.target_install_dir, "Tools/6.5.0");
        assert_eq!(archive.package_strip_dirs, 2);
        assert!(archive.extract_archive);
        assert_eq!(archive.installation_directory("/opt/qt"), "/opt/qt/Tools/6.5.0");
        assert_eq!(archive.finalize_arguments("set_executable").collect::<Vec<_>>(), vec!["bin/foo"]);
        assert!(archive.requires_repackaging("/"));
    }

    #[test]
    fn test_install_base_override() {
        let temp = TempDir::new().unwrap();
        let doc = IniDocument::parse(
            "[a]\narchive_uri = a.7z\ntarget_install_base = /custom\ntarget_install_dir = sub\n",
        )
        .unwrap();
        let archive =
            ArchiveDescriptor::from_section(&doc, "a", "qt.a", "", &resolver(temp.path(), &[])).unwrap();
        assert_eq!(archive.installation_directory("/parent"), "/custom/sub");
    }

    #[test]
    fn test_missing_archive_uri_and_section() {
        let temp = TempDir::new().unwrap();
        let doc = IniDocument::parse("[a]\narchive_action = x\n").unwrap();
        let resolver = resolver(temp.path(), &[]);
        assert!(matches!(
            ArchiveDescriptor::from_section(&doc, "a", "qt.a", "", &resolver),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            ArchiveDescriptor::from_section(&doc, "b", "qt.a", "", &resolver),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_strip_dirs() {
        let temp = TempDir::new().unwrap();
        let doc = IniDocument::parse("[a]\narchive_uri = a.7z\npackage_strip_dirs = many\n").unwrap();
        assert!(ArchiveDescriptor::from_section(&doc, "a", "qt.a", "", &resolver(temp.path(), &[])).is_err());
    }

    #[test]
    fn test_direct_copy_without_repackaging() {
        let temp = TempDir::new().unwrap();
        let doc = IniDocument::parse("[a]\narchive_uri = pkgs/a.7z\n").unwrap();
        let archive =
            ArchiveDescriptor::from_section(&doc, "a", "qt.a", "", &resolver(temp.path(), &[])).unwrap();
        assert!(!archive.requires_repackaging("/"));
        assert!(archive.requires_repackaging("/opt"));
    }

    #[test]
    fn test_check_reachability() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local.7z");
        fs::write(&local, b"x").unwrap();
        let good_url = "http://ci.example.com/ok.7z";
        let resolver = resolver(temp.path(), &[good_url]);

        let doc = IniDocument::parse(&format!(
            "[local]\narchive_uri = {}\n[remote]\narchive_uri = ok.7z\n[missing]\narchive_uri = gone.7z\n",
            local.display()
        ))
        .unwrap();
        for (section, reachable) in [("local", true), ("remote", true), ("missing", false)] {
            let archive = ArchiveDescriptor::from_section(&doc, section, "qt.a", "", &resolver).unwrap();
            let message = archive.check_reachability(resolver.probe());
            assert_eq!(message.is_none(), reachable, "{}", section);
        }
        let missing = ArchiveDescriptor::from_section(&doc, "missing", "qt.a", "", &resolver).unwrap();
        assert!(missing
            .check_reachability(resolver.probe())
            .unwrap()
            .contains("Unable to locate archive: http://ci.example.com/gone.7z"));
    }
}
