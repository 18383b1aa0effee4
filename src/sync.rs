//! Syncing updated production repositories to their mirrors.
//!
//! After the production area was updated, every task's repository is copied
//! from the repository host to an S3 bucket (`aws s3 sync`) and/or to an
//! external server (`rsync` through the repository host). Each sync runs as
//! a script on the repository host that tees its output into a log under
//! `<root>/<license>/{s3,ext}_sync_logs/`.
//!
//! # Example
//!
//! ```rust,ignore
//! let sync = ProductionSync::new("/home/builder")
//!     .with_s3("s3://qt-cdn/online")
//!     .with_ext("mirror@ext.example.com:/srv/online");
//! sync.run(&repo, &layout, &tasks)?;
//! ```

use std::fs;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::layout::RepositoryLayout;
use crate::remote::{remote_join, remote_parent, RemoteRepository};
use crate::stamp::utc_compact;
use crate::tasks::{parse_ext, ReleaseTask};

pub const S3_SYNC_LOGS_DIR: &str = "s3_sync_logs";
pub const EXT_SYNC_LOGS_DIR: &str = "ext_sync_logs";
const REMOTE_SCRIPTS_DIR: &str = "remote_scripts";

const SYNC_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const EXT_MKDIR_TIMEOUT: Duration = Duration::from_secs(10 * 60 * 60);

/// One production repository and where it lives on the repository host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    /// `<repo_domain>/<repo_path>`, also the path below the mirror base.
    pub repo: String,
    pub production_path: String,
}

/// Sync jobs for `tasks`, failing when two tasks publish the same repository.
pub fn production_sync_jobs(layout: &RepositoryLayout, tasks: &[ReleaseTask]) -> Result<Vec<SyncJob>> {
    let mut jobs: Vec<SyncJob> = Vec::new();
    for task in tasks {
        let repo = remote_join(layout.repo_domain(), &task.repo_path);
        if jobs.iter().any(|job| job.repo == repo) {
            return Err(Error::packaging(format!("Duplicate repository path found: {}", repo)));
        }
        jobs.push(SyncJob {
            repo,
            production_path: remote_join(&layout.production_path(), &task.repo_path),
        });
    }
    Ok(jobs)
}

/// Mirrors to push production repositories to.
#[derive(Debug, Clone)]
pub struct ProductionSync {
    remote_home: String,
    s3: Option<String>,
    ext: Option<String>,
    aws_program: String,
    rsync_program: String,
    ssh_program: String,
}

impl ProductionSync {
    /// Sync scripts are staged under `<remote_home>/remote_scripts/<timestamp>`.
    pub fn new(remote_home: impl Into<String>) -> Self {
        Self {
            remote_home: remote_home.into(),
            s3: None,
            ext: None,
            aws_program: "aws".to_string(),
            rsync_program: "rsync".to_string(),
            ssh_program: "ssh".to_string(),
        }
    }

    pub fn with_s3(mut self, bucket: impl Into<String>) -> Self {
        self.s3 = Some(bucket.into());
        self
    }

    /// `ext` is `<login>@<server>:/base/path`.
    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }

    /// Programs run on the repository host.
    pub fn with_programs(
        mut self,
        aws: impl Into<String>,
        rsync: impl Into<String>,
        ssh: impl Into<String>,
    ) -> Self {
        self.aws_program = aws.into();
        self.rsync_program = rsync.into();
        self.ssh_program = ssh.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.s3.is_some() || self.ext.is_some()
    }

    /// Sync the production repository of every task. Returns the scripts run.
    pub fn run(
        &self,
        repo: &RemoteRepository,
        layout: &RepositoryLayout,
        tasks: &[ReleaseTask],
    ) -> Result<Vec<String>> {
        info!("triggering production sync..");
        if self.s3.is_some() && layout.license() == "opensource" {
            return Err(Error::configuration(
                "syncing to s3 is not supported for the 'opensource' license",
            ));
        }
        let ext = self.ext.as_deref().map(parse_ext).transpose()?;
        let jobs = production_sync_jobs(layout, tasks)?;
        let stamp = utc_compact();

        let mut scripts = Vec::new();
        if let Some(bucket) = &self.s3 {
            let logs = remote_join(&layout.base_repo_path(), S3_SYNC_LOGS_DIR);
            repo.create_remote_paths(&[logs.clone()])?;
            for job in &jobs {
                scripts.extend(self.sync_to_s3(repo, bucket, job, &logs, &stamp)?);
            }
        }
        if let Some((ext_login, ext_base)) = &ext {
            let logs = remote_join(&layout.base_repo_path(), EXT_SYNC_LOGS_DIR);
            repo.create_remote_paths(&[logs.clone()])?;
            for job in &jobs {
                scripts.push(self.sync_to_ext(repo, ext_login, ext_base, job, &logs, &stamp)?);
            }
        }
        info!("Production sync trigger done!");
        Ok(scripts)
    }

    fn sync_to_s3(
        &self,
        repo: &RemoteRepository,
        bucket: &str,
        job: &SyncJob,
        logs: &str,
        stamp: &str,
    ) -> Result<Vec<String>> {
        let log_base = remote_join(&remote_join(logs, &job.repo), &format!("log-s3-{}", stamp));
        repo.create_remote_paths(&[remote_parent(&log_base)])?;
        let s3_path = remote_join(bucket, &job.repo);
        let tip = tip_prefix(&job.repo);

        info!("Syncing .7z to s3: [{}:{}] -> [{}]", repo.remote().describe(), job.production_path, s3_path);
        let mut archives = self.aws_sync(&job.production_path, &s3_path);
        archives.extend(words(&["--exclude", "*", "--include", "*.7z", "--include", "*.sha1"]));
        let first = self.spawn_remote_task(
            repo,
            &archives,
            &format!("{}-7z.txt", log_base),
            &format!("{}7z", tip),
            stamp,
        )?;

        info!("Syncing .xml to s3: [{}:{}] -> [{}]", repo.remote().describe(), job.production_path, s3_path);
        let mut metadata = self.aws_sync(&job.production_path, &s3_path);
        metadata.extend(words(&["--cache-control", "max-age=0", "--exclude", "*", "--include", "*.xml"]));
        let second = self.spawn_remote_task(
            repo,
            &metadata,
            &format!("{}-xml.txt", log_base),
            &format!("{}xml", tip),
            stamp,
        )?;
        Ok(vec![first, second])
    }

    fn aws_sync(&self, source: &str, dest: &str) -> Vec<String> {
        vec![
            self.aws_program.clone(),
            "s3".to_string(),
            "sync".to_string(),
            source.to_string(),
            dest.to_string(),
        ]
    }

    fn sync_to_ext(
        &self,
        repo: &RemoteRepository,
        ext_login: &str,
        ext_base: &str,
        job: &SyncJob,
        logs: &str,
        stamp: &str,
    ) -> Result<String> {
        let log_file = remote_join(&remote_join(logs, &job.repo), &format!("log-ext-{}.txt", stamp));
        repo.create_remote_paths(&[remote_parent(&log_file)])?;
        let ext_repo = remote_join(ext_base, &job.repo);

        // rsync does not create missing parents on the receiving side
        self.ensure_ext_repo_paths(repo, ext_login, &ext_repo)?;
        let command = vec![
            self.rsync_program.clone(),
            "-r".to_string(),
            "--omit-dir-times".to_string(),
            "--delete-delay".to_string(),
            "--progress".to_string(),
            format!("{}/", job.production_path.trim_end_matches('/')),
            format!("{}:{}", ext_login, ext_repo),
        ];
        self.spawn_remote_task(repo, &command, &log_file, &format!("{}ext", tip_prefix(&job.repo)), stamp)
    }

    /// Create `ext_repo` on the external server, reached through the repository host.
    pub fn ensure_ext_repo_paths(&self, repo: &RemoteRepository, ext_login: &str, ext_repo: &str) -> Result<()> {
        info!("Ensure repository paths on ext: {}:{}", ext_login, ext_repo);
        let args = vec![
            "-t".to_string(),
            "-t".to_string(),
            ext_login.to_string(),
            format!("mkdir -p {}", shell_words::quote(ext_repo)),
        ];
        let output = repo.remote().run(&self.ssh_program, &args, EXT_MKDIR_TIMEOUT)?;
        if !output.success {
            return Err(Error::Command {
                cmd: format!("{} {}", self.ssh_program, args.join(" ")),
                message: output.combined().trim().to_string(),
            });
        }
        Ok(())
    }

    /// Stage `command` as a script on the repository host and run it there,
    /// teeing its output into `log_file`. Returns the remote script path.
    fn spawn_remote_task(
        &self,
        repo: &RemoteRepository,
        command: &[String],
        log_file: &str,
        tip: &str,
        stamp: &str,
    ) -> Result<String> {
        let script_dir = remote_join(&remote_join(&self.remote_home, REMOTE_SCRIPTS_DIR), stamp);
        let script_name = format!("sync-production-{}-{}.sh", tip, stamp);
        let body = format!(
            "#!/usr/bin/env bash\nset -o pipefail\n{} 2>&1 | tee {}\n",
            shell_words::join(command),
            shell_words::quote(log_file)
        );

        let local = tempfile::tempdir()?;
        let local_script = local.path().join(&script_name);
        fs::write(&local_script, body).map_err(|e| Error::path(&local_script, e))?;
        make_executable(&local_script)?;

        repo.create_remote_paths(&[script_dir.clone()])?;
        repo.remote().upload_dir(local.path(), &script_dir)?;
        let script = remote_join(&script_dir, &script_name);
        info!("Created remote script: [{}] with contents: {}", script, command.join(" "));

        let output = repo.remote().run(&script, &[], SYNC_TIMEOUT)?;
        if !output.success {
            return Err(Error::Command {
                cmd: script,
                message: output.combined().trim().to_string(),
            });
        }
        Ok(script)
    }
}

fn tip_prefix(repo: &str) -> String {
    format!("{}-", repo.replace('/', "-"))
}

fn words(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| Error::path(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IniDocument;
    use crate::platform::{OsFamily, PlatformInfo};
    use crate::remote::LocalHost;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn repository() -> RemoteRepository {
        RemoteRepository::new(
            Box::new(LocalHost),
            PlatformInfo::new(OsFamily::Linux, Some(PathBuf::from("/home/tester"))),
        )
    }

    fn tasks(repo_paths: &[&str]) -> Vec<ReleaseTask> {
        let mut text = String::new();
        for (i, path) in repo_paths.iter().enumerate() {
            text.push_str(&format!(
                "[task.repository.linux.x{}]\nconfig_file: cfg\nrepo_path: {}\n",
                i, path
            ));
        }
        let doc = IniDocument::parse(&text).unwrap();
        (0..repo_paths.len())
            .map(|i| ReleaseTask::from_section(&doc, &format!("task.repository.linux.x{}", i)).unwrap())
            .collect()
    }

    #[test]
    fn test_production_sync_jobs() {
        let layout = RepositoryLayout::new("/data/online", "enterprise", "qtsdkrepository");
        let jobs = production_sync_jobs(&layout, &tasks(&["qt6/linux", "qt6/mac"])).unwrap();
        assert_eq!(
            jobs[0],
            SyncJob {
                repo: "qtsdkrepository/qt6/linux".to_string(),
                production_path: "/data/online/enterprise/production/qtsdkrepository/qt6/linux".to_string(),
            }
        );
        assert_eq!(jobs[1].repo, "qtsdkrepository/qt6/mac");
    }

    #[test]
    fn test_duplicate_repository_paths_are_rejected() {
        let layout = RepositoryLayout::new("/data/online", "enterprise", "qtsdkrepository");
        let err = production_sync_jobs(&layout, &tasks(&["qt6/linux", "qt6/linux"])).unwrap_err();
        assert!(matches!(err, Error::Packaging(msg) if msg.contains("qtsdkrepository/qt6/linux")));
    }

    #[test]
    fn test_s3_refused_for_opensource() {
        let temp = TempDir::new().unwrap();
        let layout = RepositoryLayout::new(temp.path().to_string_lossy(), "opensource", "domain");
        let sync = ProductionSync::new(temp.path().to_string_lossy()).with_s3("s3://bucket");
        let result = sync.run(&repository(), &layout, &tasks(&["qt6"]));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_ext_is_rejected_before_syncing() {
        let temp = TempDir::new().unwrap();
        let layout = RepositoryLayout::new(temp.path().to_string_lossy(), "enterprise", "domain");
        let sync = ProductionSync::new(temp.path().to_string_lossy()).with_ext("mirror:relative/path");
        let result = sync.run(&repository(), &layout, &tasks(&["qt6"]));
        assert!(matches!(result, Err(Error::Packaging(_))));
        assert!(!temp.path().join("enterprise").exists());
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(!ProductionSync::new("/home/builder").is_enabled());
        assert!(ProductionSync::new("/home/builder").with_ext("a@b:/c").is_enabled());
    }

    #[cfg(unix)]
    fn recorder(dir: &Path, name: &str, log: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join(name);
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"{} $*\" >> '{}'\necho \"{} done\"\n", name, log.display(), name),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_to_s3_and_ext() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let calls = temp.path().join("calls");
        let aws = recorder(&bin, "aws", &calls);
        let rsync = recorder(&bin, "rsync", &calls);
        let ssh = recorder(&bin, "ssh", &calls);

        let root = temp.path().join("srv");
        let home = temp.path().join("home");
        let layout = RepositoryLayout::new(root.to_string_lossy(), "enterprise", "domain");
        fs::create_dir_all(Path::new(&layout.production_path()).join("qt6/linux")).unwrap();

        let sync = ProductionSync::new(home.to_string_lossy())
            .with_s3("s3://bucket/online")
            .with_ext("mirror@ext.example.com:/srv/mirror")
            .with_programs(aws, rsync, ssh);
        let scripts = sync.run(&repository(), &layout, &tasks(&["qt6/linux"])).unwrap();

        assert_eq!(scripts.len(), 3);
        assert!(scripts[0].ends_with(".sh") && scripts[0].contains("sync-production-domain-qt6-linux-7z-"));
        assert!(scripts[1].contains("sync-production-domain-qt6-linux-xml-"));
        assert!(scripts[2].contains("sync-production-domain-qt6-linux-ext-"));
        assert!(scripts.iter().all(|s| Path::new(s).is_file()));

        let recorded = fs::read_to_string(&calls).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(lines.len(), 4);
        let production = format!("{}/qt6/linux", layout.production_path());
        assert_eq!(
            lines[0],
            format!(
                "aws s3 sync {} s3://bucket/online/domain/qt6/linux --exclude * --include *.7z --include *.sha1",
                production
            )
        );
        assert!(lines[1].starts_with("aws s3 sync "));
        assert!(lines[1].ends_with("--cache-control max-age=0 --exclude * --include *.xml"));
        assert_eq!(
            lines[2],
            "ssh -t -t mirror@ext.example.com mkdir -p /srv/mirror/domain/qt6/linux"
        );
        assert_eq!(
            lines[3],
            format!(
                "rsync -r --omit-dir-times --delete-delay --progress {}/ mirror@ext.example.com:/srv/mirror/domain/qt6/linux",
                production
            )
        );

        let s3_logs = root.join("enterprise/s3_sync_logs/domain/qt6/linux");
        let mut log_names: Vec<String> = fs::read_dir(&s3_logs)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        log_names.sort();
        assert_eq!(log_names.len(), 2);
        assert!(log_names[0].ends_with("-7z.txt"));
        assert!(log_names[1].ends_with("-xml.txt"));
        let log = fs::read_to_string(s3_logs.join(&log_names[0])).unwrap();
        assert_eq!(log.trim(), "aws done");

        let ext_logs = root.join("enterprise/ext_sync_logs/domain/qt6/linux");
        assert_eq!(fs::read_dir(&ext_logs).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_sync_command_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let failing = temp.path().join("aws");
        fs::write(&failing, "#!/bin/sh\necho 'upload failed'\nexit 1\n").unwrap();
        fs::set_permissions(&failing, fs::Permissions::from_mode(0o755)).unwrap();

        let layout = RepositoryLayout::new(temp.path().join("srv").to_string_lossy(), "enterprise", "domain");
        let sync = ProductionSync::new(temp.path().join("home").to_string_lossy())
            .with_s3("s3://bucket")
            .with_programs(failing.to_string_lossy(), "rsync", "ssh");
        let result = sync.run(&repository(), &layout, &tasks(&["qt6"]));
        assert!(matches!(result, Err(Error::Command { message, .. }) if message.contains("upload failed")));
    }
}
