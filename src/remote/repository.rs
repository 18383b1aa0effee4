//! Mutations of a persistent package repository tree on the repository host.
//!
//! Every create, delete and replace goes through [`is_safe_repo_directory`]
//! first. Nothing here rolls back: a failed update leaves the target as the
//! repository generator left it, with the backup next to it.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdk_packager::remote::{RemoteRepository, SshRemote};
//! use sdk_packager::platform::PlatformInfo;
//!
//! let repo = RemoteRepository::new(Box::new(SshRemote::new("builder@staging")), PlatformInfo::detect());
//! if repo.contains_repository("/data/online/opensource/staging/qt6")? {
//!     repo.update_remote_repository(&repogen, "/data/pending/qt6/pkg", "/data/online/opensource/staging/qt6")?;
//! } else {
//!     repo.reset_new_remote_repository("/data/pending/qt6/repository", "/data/online/opensource/staging/qt6")?;
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use tracing::info;

use super::{is_safe_repo_directory, remote_join, RemoteFileOps};
use crate::error::{Error, Result};
use crate::manifest::{changed_components, parse_updates, PackageUpdate};
use crate::platform::PlatformInfo;
use crate::remote::check_repogen_output;
use crate::stamp::utc_compact;

/// Appended to the repository path to name its backup.
pub const BACKUP_SUFFIX: &str = "____snapshot_backup";

const UPDATES_XML: &str = "Updates.xml";
const REPOGEN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Result of a successful repository update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub backup: String,
    /// Packages that are new or changed version in `Updates.xml`.
    pub changed_components: Vec<String>,
    pub repogen_output: String,
}

pub struct RemoteRepository {
    remote: Box<dyn RemoteFileOps>,
    platform: PlatformInfo,
}

impl RemoteRepository {
    pub fn new(remote: Box<dyn RemoteFileOps>, platform: PlatformInfo) -> Self {
        Self { remote, platform }
    }

    pub fn remote(&self) -> &dyn RemoteFileOps {
        self.remote.as_ref()
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn create_remote_paths(&self, paths: &[String]) -> Result<()> {
        is_safe_repo_directory(paths, &self.platform)?;
        self.remote.create_dirs(paths)
    }

    pub fn delete_remote_paths(&self, paths: &[String]) -> Result<()> {
        is_safe_repo_directory(paths, &self.platform)?;
        self.remote.delete_paths(paths)
    }

    pub fn remote_repository_exists(&self, path: &str) -> Result<bool> {
        self.remote.dir_exists(path)
    }

    pub fn remote_file_exists(&self, path: &str) -> Result<bool> {
        self.remote.file_exists(path)
    }

    /// True when `path` holds `Updates.xml` or at least one `<component>/meta/package.xml`.
    pub fn contains_repository(&self, path: &str) -> Result<bool> {
        if !self.remote.dir_exists(path)? {
            return Ok(false);
        }
        if self.remote.file_exists(&remote_join(path, UPDATES_XML))? {
            return Ok(true);
        }
        for entry in self.remote.list_dir(path)? {
            let package_xml = remote_join(&remote_join(path, &entry), "meta/package.xml");
            if self.remote.file_exists(&package_xml)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_updates(&self, repo: &str) -> Result<Vec<PackageUpdate>> {
        Ok(self
            .remote
            .read_to_string(&remote_join(repo, UPDATES_XML))?
            .map(|xml| parse_updates(&xml))
            .unwrap_or_default())
    }

    /// Copy the repository to `<repo>____snapshot_backup-<timestamp>` and
    /// verify the copy. Returns the backup path.
    pub fn create_remote_repository_backup(&self, repo: &str) -> Result<String> {
        let repo = repo.trim_end_matches('/');
        let backup = format!("{}{}-{}", repo, BACKUP_SUFFIX, utc_compact());
        if self.remote.dir_exists(&backup)? {
            info!("deleting stale backup: {}", backup);
            self.delete_remote_paths(&[backup.clone()])?;
        }
        self.create_remote_paths(&[backup.clone()])?;
        self.remote.copy_tree_contents(repo, &backup)?;

        self.verify_backup(repo, &backup)?;
        info!("{}: backed up {} -> {}", self.remote.describe(), repo, backup);
        Ok(backup)
    }

    /// The backup must exist and hold the same tree as `repo`.
    fn verify_backup(&self, repo: &str, backup: &str) -> Result<()> {
        if !self.remote.dir_exists(backup)? {
            return Err(Error::packaging(format!("backup was not created: {}", backup)));
        }
        let source_listing = self.remote.list_tree(repo)?;
        let backup_listing = self.remote.list_tree(backup)?;
        if source_listing != backup_listing {
            let missing: Vec<&String> = source_listing
                .iter()
                .filter(|entry| !backup_listing.contains(entry))
                .collect();
            return Err(Error::packaging(format!(
                "backup {} does not match {}, missing: {:?}",
                backup, repo, missing
            )));
        }
        Ok(())
    }

    /// Initialise `target` as a copy of `source`.
    ///
    /// Fails when `source` is missing or `target` already has content; an
    /// existing repository is changed with [`Self::update_remote_repository`].
    pub fn reset_new_remote_repository(&self, source: &str, target: &str) -> Result<()> {
        if !self.remote.dir_exists(source)? {
            return Err(Error::packaging(format!(
                "the source repository does not exist on {}: {}",
                self.remote.describe(),
                source
            )));
        }
        if self.remote.dir_exists(target)? && !self.remote.list_dir(target)?.is_empty() {
            return Err(Error::packaging(format!(
                "the target already contains a repository, use update instead: {}",
                target
            )));
        }
        info!("reset new remote repository: {} -> {}", source, target);
        self.create_remote_paths(&[target.to_string()])?;
        self.remote.copy_tree_contents(source, target)
    }

    /// Merge the staging package directory into the repository at `target`
    /// with `repogen --update-new-components`, after taking a backup.
    pub fn update_remote_repository(
        &self,
        repogen: &str,
        staging_pkg: &str,
        target: &str,
    ) -> Result<UpdateOutcome> {
        if !self.contains_repository(target)? {
            return Err(Error::packaging(format!(
                "no repository to update at {}, reset a new one instead",
                target
            )));
        }
        if !self.remote.dir_exists(staging_pkg)? {
            return Err(Error::packaging(format!(
                "the staging package directory does not exist: {}",
                staging_pkg
            )));
        }
        is_safe_repo_directory(&[target], &self.platform)?;

        let before = self.read_updates(target)?;
        let backup = self.create_remote_repository_backup(target)?;

        let args = vec![
            "--update-new-components".to_string(),
            "-p".to_string(),
            staging_pkg.to_string(),
            target.to_string(),
        ];
        let output = self.remote.run(repogen, &args, REPOGEN_TIMEOUT)?;
        let text = output.combined();
        if !output.success {
            return Err(Error::packaging(format!(
                "Repogen failed with exit status {:?}: {}",
                output.code,
                text.trim()
            )));
        }
        check_repogen_output(&text)?;

        let after = self.read_updates(target)?;
        let changed = changed_components(&before, &after);
        info!("updated {}: {:?}", target, changed);
        Ok(UpdateOutcome {
            backup,
            changed_components: changed,
            repogen_output: text,
        })
    }

    /// Replace `remote_dest` with the contents of a local directory.
    pub fn upload_pending_repository_content(&self, local_source: &Path, remote_dest: &str) -> Result<()> {
        info!(
            "uploading pending repository content: {} -> {}:{}",
            local_source.display(),
            self.remote.describe(),
            remote_dest
        );
        self.delete_remote_paths(&[remote_dest.to_string()])?;
        self.create_remote_paths(&[remote_dest.to_string()])?;
        self.remote.upload_dir(local_source, remote_dest)
    }

    /// Stage a local installer-framework tool tree under
    /// `<remote_home>/ifw_tools/<timestamp>`. Returns the remote `repogen` path.
    pub fn upload_ifw_to_remote(&self, local_tools_root: &Path, remote_home: &str) -> Result<String> {
        let remote_dir = remote_join(&remote_join(remote_home, "ifw_tools"), &utc_compact());
        self.create_remote_paths(&[remote_dir.clone()])?;
        self.remote.upload_dir(local_tools_root, &remote_dir)?;
        Ok(remote_join(&remote_dir, "bin/repogen"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OsFamily;
    use crate::remote::LocalHost;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn repository() -> RemoteRepository {
        RemoteRepository::new(
            Box::new(LocalHost),
            PlatformInfo::new(OsFamily::Linux, Some(PathBuf::from("/home/tester"))),
        )
    }

    fn s(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn package_xml(version: &str, date: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?>\n<Package>\n <DisplayName>Test Foo</DisplayName>\n <Version>{}</Version>\n <ReleaseDate>{}</ReleaseDate>\n</Package>\n",
            version, date
        )
    }

    fn updates_xml(version: &str, date: &str) -> String {
        format!(
            "<Updates>\n <ApplicationName>{{AnyApplication}}</ApplicationName>\n <PackageUpdate>\n  <Name>qt.foo.bar1</Name>\n  <Version>{}</Version>\n  <ReleaseDate>{}</ReleaseDate>\n </PackageUpdate>\n</Updates>\n",
            version, date
        )
    }

    fn seed_repository(root: &Path) {
        write(&root.join("qt.foo.bar1/meta/package.xml"), &package_xml("1.0", "2020-01-01"));
        write(&root.join("qt.foo.bar2/meta/package.xml"), &package_xml("1.0", "2020-01-01"));
        write(&root.join("Updates.xml"), &updates_xml("1.0", "2020-01-01"));
    }

    #[test]
    fn test_exists_probes() {
        let temp = TempDir::new().unwrap();
        let repo = repository();
        assert!(repo.remote_repository_exists(&s(temp.path())).unwrap());
        assert!(!repo.remote_repository_exists("/some/bogus/directory/foo").unwrap());
        let file = temp.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        assert!(repo.remote_file_exists(&s(&file)).unwrap());
        assert!(!repo.remote_file_exists("/some/bogus/directory/foo.txt").unwrap());
    }

    #[test]
    fn test_contains_repository() {
        let temp = TempDir::new().unwrap();
        let repo = repository();
        let meta_only = temp.path().join("meta_only");
        write(&meta_only.join("qt.a/meta/package.xml"), &package_xml("1", "d"));
        let empty = temp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        assert!(repo.contains_repository(&s(&meta_only)).unwrap());
        assert!(!repo.contains_repository(&s(&empty)).unwrap());
        assert!(!repo.contains_repository(&s(&temp.path().join("missing"))).unwrap());
    }

    #[test]
    fn test_upload_pending_repository_content() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repository");
        seed_repository(&source);
        let dest = temp.path().join("destination_online_repository");
        write(&dest.join("stale.txt"), "old");

        let repo = repository();
        repo.upload_pending_repository_content(&source, &s(&dest)).unwrap();
        assert_eq!(
            repo.remote().list_dir(&s(&source)).unwrap(),
            repo.remote().list_dir(&s(&dest)).unwrap()
        );
    }

    #[test]
    fn test_reset_new_remote_repository_is_one_shot() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repository");
        seed_repository(&source);
        let target = temp.path().join("destination_online_repository");

        let repo = repository();
        repo.reset_new_remote_repository(&s(&source), &s(&target)).unwrap();
        assert!(target.join("qt.foo.bar1/meta/package.xml").is_file());
        assert!(target.join("qt.foo.bar2/meta/package.xml").is_file());
        assert!(target.join("Updates.xml").is_file());

        let err = repo
            .reset_new_remote_repository(&s(&source), &s(&target))
            .unwrap_err();
        assert!(matches!(err, Error::Packaging(msg) if msg.contains("use update")));
    }

    #[test]
    fn test_reset_requires_source() {
        let temp = TempDir::new().unwrap();
        let repo = repository();
        let result = repo.reset_new_remote_repository(
            &s(&temp.path().join("missing")),
            &s(&temp.path().join("target")),
        );
        assert!(matches!(result, Err(Error::Packaging(_))));
        assert!(!temp.path().join("target").exists());
    }

    #[test]
    fn test_create_remote_repository_backup() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repository");
        seed_repository(&source);

        let repo = repository();
        let backup = repo.create_remote_repository_backup(&s(&source)).unwrap();
        assert!(backup.contains(BACKUP_SUFFIX));
        assert_eq!(
            repo.remote().list_tree(&s(&source)).unwrap(),
            repo.remote().list_tree(&backup).unwrap()
        );
        assert!(source.join("Updates.xml").is_file());
    }

    #[test]
    fn test_backup_with_missing_nested_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repository");
        seed_repository(&source);
        let partial = temp.path().join("partial");
        seed_repository(&partial);
        fs::remove_file(partial.join("qt.foo.bar2/meta/package.xml")).unwrap();

        let repo = repository();
        assert_eq!(
            repo.remote().list_dir(&s(&source)).unwrap(),
            repo.remote().list_dir(&s(&partial)).unwrap()
        );
        let err = repo.verify_backup(&s(&source), &s(&partial)).unwrap_err();
        assert!(matches!(err, Error::Packaging(msg) if msg.contains("qt.foo.bar2/meta/package.xml")));

        seed_repository(&partial);
        assert!(repo.verify_backup(&s(&source), &s(&partial)).is_ok());
    }

    #[test]
    fn test_unsafe_paths_are_refused() {
        let repo = repository();
        assert!(repo.delete_remote_paths(&["/".to_string()]).is_err());
        assert!(repo.create_remote_paths(&["/home/tester".to_string()]).is_err());
        assert!(repo.reset_new_remote_repository("/bin", "/bin").is_err());
    }

    #[test]
    fn test_update_requires_existing_repository() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        let repo = repository();
        let result = repo.update_remote_repository("repogen", &s(&pkg), &s(&temp.path().join("nothing")));
        assert!(matches!(result, Err(Error::Packaging(msg)) if msg.contains("reset")));
    }

    #[test]
    fn test_upload_ifw_to_remote() {
        let temp = TempDir::new().unwrap();
        let tools = temp.path().join("tools");
        write(&tools.join("bin/repogen"), "#!/bin/sh\n");
        let home = temp.path().join("home");

        let repo = repository();
        let repogen = repo.upload_ifw_to_remote(&tools, &s(&home)).unwrap();
        assert!(repogen.ends_with("/bin/repogen"));
        assert!(repogen.contains("/ifw_tools/"));
        assert!(Path::new(&repogen).is_file());
    }

    #[cfg(unix)]
    fn fake_repogen(dir: &Path, output_line: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("repogen");
        let body = format!(
            r#"#!/bin/sh
# usage: repogen --update-new-components -p <pkg> <target>
pkg="$3"
target="$4"
for dir in "$pkg"/*/; do
    name=$(basename "$dir")
    mkdir -p "$target/$name/meta"
    cp "$dir/meta/package.xml" "$target/$name/meta/package.xml"
    version=$(sed -n 's:.*<Version>\(.*\)</Version>.*:\1:p' "$dir/meta/package.xml")
    date=$(sed -n 's:.*<ReleaseDate>\(.*\)</ReleaseDate>.*:\1:p' "$dir/meta/package.xml")
    echo "{output_line} $name"
done
cat > "$target/Updates.xml" <<EOF
<Updates>
 <ApplicationName>{{AnyApplication}}</ApplicationName>
 <PackageUpdate>
  <Name>$name</Name>
  <Version>$version</Version>
  <ReleaseDate>$date</ReleaseDate>
 </PackageUpdate>
</Updates>
EOF
"#
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        s(&script)
    }

    #[cfg(unix)]
    #[test]
    fn test_reset_then_update_bumps_version() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("repository");
        write(&source.join("qt.foo.bar1/meta/package.xml"), &package_xml("1.0", "2020-01-01"));
        write(&source.join("Updates.xml"), &updates_xml("1.0", "2020-01-01"));
        let target = temp.path().join("destination_online_repository");

        let repo = repository();
        repo.reset_new_remote_repository(&s(&source), &s(&target)).unwrap();

        let pkg = temp.path().join("pkg");
        write(&pkg.join("qt.foo.bar1/meta/package.xml"), &package_xml("1.1", "2020-01-02"));
        let repogen = fake_repogen(temp.path(), "Update component");

        let outcome = repo
            .update_remote_repository(&repogen, &s(&pkg), &s(&target))
            .unwrap();
        assert_eq!(outcome.changed_components, vec!["qt.foo.bar1"]);
        assert!(Path::new(&outcome.backup).join("Updates.xml").is_file());

        let updates = fs::read_to_string(target.join("Updates.xml")).unwrap();
        let version_line = updates
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("<Version>"))
            .unwrap();
        assert_eq!(version_line, "<Version>1.1</Version>");
        let backup_updates = fs::read_to_string(Path::new(&outcome.backup).join("Updates.xml")).unwrap();
        assert!(backup_updates.contains("<Version>1.0</Version>"));
    }

    #[cfg(unix)]
    #[test]
    fn test_update_reports_repogen_failure() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        seed_repository(&target);
        let pkg = temp.path().join("pkg");
        write(&pkg.join("qt.foo.bar1/meta/package.xml"), &package_xml("1.1", "2020-01-02"));
        let repogen = fake_repogen(temp.path(), "Error: invalid component");

        let repo = repository();
        let result = repo.update_remote_repository(&repogen, &s(&pkg), &s(&target));
        assert!(matches!(result, Err(Error::Packaging(msg)) if msg.starts_with("Repogen failed")));
    }
}
