//! Publishing locally built online repositories to the repository host.
//!
//! Per task the online repository is uploaded to the pending area, from where
//! it either initialises the staging/production repository or is merged into
//! it with `repogen`. The pending copy is removed afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! let layout = RepositoryLayout::new("/data/online_repositories", "opensource", "qtsdkrepository");
//! let mut tasks = parse_config(Path::new("release.ini"), &["repository".into()])?;
//! prepare_task_sources(&mut tasks, &default_work_dir()?);
//! update_repositories(&repo, &layout, &tasks, PublishTargets::staging_only(), None, &ifw_root, "/home/builder")?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::layout::RepositoryLayout;
use crate::remote::{remote_join, remote_parent, RemoteRepository, UpdateOutcome};
use crate::tasks::ReleaseTask;

/// Local directory holding the per-task repository builds.
pub const WORK_DIR_NAME: &str = "_repo_update_jobs";

const RTA_TIMEOUT: Duration = Duration::from_secs(60);

/// Which published areas a run touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishTargets {
    pub staging: bool,
    pub production: bool,
}

impl PublishTargets {
    pub fn staging_only() -> Self {
        Self {
            staging: true,
            production: false,
        }
    }
}

/// What happened to one destination repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAction {
    Reset { target: String },
    Updated { target: String, outcome: UpdateOutcome },
}

pub fn default_work_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?.join(WORK_DIR_NAME))
}

/// Point every task at `<work_dir>/<repo_path>/{online_repository,pkg}`.
pub fn prepare_task_sources(tasks: &mut [ReleaseTask], work_dir: &Path) {
    for task in tasks {
        let task_dir = work_dir.join(&task.repo_path);
        task.source_online_repository_path = Some(task_dir.join("online_repository"));
        task.source_pkg_path = Some(task_dir.join("pkg"));
    }
}

/// Publish one task into the enabled areas of `layout`.
pub fn publish_task(
    repo: &RemoteRepository,
    layout: &RepositoryLayout,
    task: &ReleaseTask,
    targets: PublishTargets,
    repogen: &str,
) -> Result<Vec<PublishAction>> {
    let source = task.source_online_repository_path.as_deref().ok_or_else(|| {
        Error::packaging(format!(
            "Can not update repository: [{}] because source repo is missing",
            task.repo_path
        ))
    })?;
    info!("Starting repository update: {}", task.repo_path);
    repo.create_remote_paths(&layout.repo_layout())?;

    let pending = remote_join(&layout.pending_path(), &task.repo_path);
    let pending_repository = remote_join(&pending, "repository");
    let pending_pkg = remote_join(&pending, "pkg");
    repo.upload_pending_repository_content(source, &pending_repository)?;

    let mut destinations = Vec::new();
    if targets.staging {
        destinations.push(remote_join(&layout.staging_path(), &task.repo_path));
    }
    if targets.production {
        destinations.push(remote_join(&layout.production_path(), &task.repo_path));
    }

    let mut actions = Vec::new();
    let mut pkg_uploaded = false;
    for target in destinations {
        if !repo.contains_repository(&target)? {
            repo.reset_new_remote_repository(&pending_repository, &target)?;
            actions.push(PublishAction::Reset { target });
            continue;
        }
        let pkg = task.source_pkg_path.as_deref().ok_or_else(|| {
            Error::packaging(format!(
                "[{}] has no package directory to update {} with",
                task.name, target
            ))
        })?;
        if !pkg_uploaded {
            repo.upload_pending_repository_content(pkg, &pending_pkg)?;
            pkg_uploaded = true;
        }
        let outcome = repo.update_remote_repository(repogen, &pending_pkg, &target)?;
        actions.push(PublishAction::Updated { target, outcome });
    }

    info!("Update done: {}", task.repo_path);
    repo.delete_remote_paths(&[pending_repository, pending_pkg])?;
    Ok(actions)
}

/// Trigger the RTA jobs of `task`. Returns the URLs that could not be triggered.
pub fn trigger_rta(rta_base_url: &str, task: &ReleaseTask) -> Vec<String> {
    let keys = task.get_rta_key_list();
    if keys.is_empty() {
        return Vec::new();
    }
    let urls: Vec<String> = keys
        .iter()
        .map(|key| format!("{}{}/build?token=RTA_JENKINS", rta_base_url, key))
        .collect();
    let client = match reqwest::blocking::Client::builder().timeout(RTA_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create http client for RTA triggers: {}", e);
            return urls;
        }
    };

    let mut failed = Vec::new();
    for url in urls {
        info!("Triggering RTA case: {}", url);
        let ok = match client.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("{}: {}", url, e);
                false
            }
        };
        if !ok {
            error!("Failed to trigger RTA for: {}", url);
            failed.push(url);
        }
    }
    failed
}

/// Stage the tools, publish every task, then remove the staged tools.
pub fn update_repositories(
    repo: &RemoteRepository,
    layout: &RepositoryLayout,
    tasks: &[ReleaseTask],
    targets: PublishTargets,
    rta_base_url: Option<&str>,
    ifw_tools_root: &Path,
    remote_home: &str,
) -> Result<Vec<PublishAction>> {
    let repogen = repo.upload_ifw_to_remote(ifw_tools_root, remote_home)?;
    let result = publish_all(repo, layout, tasks, targets, rta_base_url, &repogen);
    if let Err(e) = &result {
        error!("Aborting online repository update: {}", e);
    }
    let staged_tools = remote_parent(&remote_parent(&repogen));
    repo.delete_remote_paths(&[staged_tools])?;
    result
}

fn publish_all(
    repo: &RemoteRepository,
    layout: &RepositoryLayout,
    tasks: &[ReleaseTask],
    targets: PublishTargets,
    rta_base_url: Option<&str>,
    repogen: &str,
) -> Result<Vec<PublishAction>> {
    let mut actions = Vec::new();
    for task in tasks {
        actions.extend(publish_task(repo, layout, task, targets, repogen)?);
        if let Some(url) = rta_base_url {
            trigger_rta(url, task);
        }
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IniDocument;
    use crate::platform::{OsFamily, PlatformInfo};
    use crate::remote::LocalHost;
    use std::fs;
    use tempfile::TempDir;

    fn repository() -> RemoteRepository {
        RemoteRepository::new(
            Box::new(LocalHost),
            PlatformInfo::new(OsFamily::Linux, Some(PathBuf::from("/home/tester"))),
        )
    }

    fn task(repo_path: &str, rta: &str) -> ReleaseTask {
        let text = format!(
            "[task.repository.linux.x86_64]\nconfig_file: cfg\nrepo_path: {}\nrta_key_list: {}\n",
            repo_path, rta
        );
        let doc = IniDocument::parse(&text).unwrap();
        ReleaseTask::from_section(&doc, "task.repository.linux.x86_64").unwrap()
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_prepare_task_sources() {
        let mut tasks = vec![task("qt6/linux", "")];
        prepare_task_sources(&mut tasks, Path::new("/work/_repo_update_jobs"));
        assert_eq!(
            tasks[0].source_online_repository_path.as_deref(),
            Some(Path::new("/work/_repo_update_jobs/qt6/linux/online_repository"))
        );
        assert_eq!(
            tasks[0].source_pkg_path.as_deref(),
            Some(Path::new("/work/_repo_update_jobs/qt6/linux/pkg"))
        );
    }

    #[test]
    fn test_publish_requires_source() {
        let temp = TempDir::new().unwrap();
        let layout = RepositoryLayout::new(temp.path().to_string_lossy(), "opensource", "domain");
        let result = publish_task(
            &repository(),
            &layout,
            &task("qt6", ""),
            PublishTargets::staging_only(),
            "repogen",
        );
        assert!(matches!(result, Err(Error::Packaging(_))));
    }

    #[test]
    fn test_first_publish_resets_staging() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        let mut tasks = vec![task("qt6/linux", "")];
        prepare_task_sources(&mut tasks, &work);
        write(
            &work.join("qt6/linux/online_repository/Updates.xml"),
            "<Updates><PackageUpdate><Name>qt.a</Name><Version>1.0</Version></PackageUpdate></Updates>",
        );

        let layout = RepositoryLayout::new(temp.path().join("srv").to_string_lossy(), "opensource", "domain");
        let actions = publish_task(&repository(), &layout, &tasks[0], PublishTargets::staging_only(), "repogen").unwrap();

        let staging = remote_join(&layout.staging_path(), "qt6/linux");
        assert_eq!(actions, vec![PublishAction::Reset { target: staging.clone() }]);
        assert!(Path::new(&staging).join("Updates.xml").is_file());
        assert!(!Path::new(&remote_join(&layout.pending_path(), "qt6/linux/repository")).exists());
        assert!(Path::new(&layout.production_path()).is_dir());
        assert!(!Path::new(&remote_join(&layout.production_path(), "qt6/linux")).exists());
    }

    #[test]
    fn test_trigger_rta_reports_failures() {
        assert!(trigger_rta("http://127.0.0.1:9/job/", &task("qt6", "")).is_empty());
        let failed = trigger_rta("http://127.0.0.1:9/job/", &task("qt6", "key1, key 2"));
        assert_eq!(
            failed,
            vec![
                "http://127.0.0.1:9/job/key1/build?token=RTA_JENKINS",
                "http://127.0.0.1:9/job/key2/build?token=RTA_JENKINS",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_update_repositories_updates_and_cleans_up_tools() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        let mut tasks = vec![task("qt6/linux", "")];
        prepare_task_sources(&mut tasks, &work);
        write(
            &work.join("qt6/linux/online_repository/Updates.xml"),
            "<Updates><PackageUpdate><Name>qt.a</Name><Version>1.0</Version></PackageUpdate></Updates>",
        );
        write(&work.join("qt6/linux/pkg/qt.a/meta/package.xml"), "<Package><Version>1.1</Version></Package>");

        let tools = temp.path().join("ifw");
        let repogen = tools.join("bin/repogen");
        write(
            &repogen,
            "#!/bin/sh\necho '<Updates><PackageUpdate><Name>qt.a</Name><Version>1.1</Version></PackageUpdate></Updates>' > \"$4/Updates.xml\"\necho 'Update component qt.a'\n",
        );
        fs::set_permissions(&repogen, fs::Permissions::from_mode(0o755)).unwrap();

        let home = temp.path().join("home");
        let layout = RepositoryLayout::new(temp.path().join("srv").to_string_lossy(), "opensource", "domain");
        let repo = repository();
        let targets = PublishTargets::staging_only();

        let first = update_repositories(&repo, &layout, &tasks, targets, None, &tools, &home.to_string_lossy()).unwrap();
        assert!(matches!(first[0], PublishAction::Reset { .. }));

        let second = update_repositories(&repo, &layout, &tasks, targets, None, &tools, &home.to_string_lossy()).unwrap();
        match &second[0] {
            PublishAction::Updated { outcome, .. } => {
                assert_eq!(outcome.changed_components, vec!["qt.a"]);
            }
            other => panic!("expected an update, got {:?}", other),
        }
        let staging = remote_join(&layout.staging_path(), "qt6/linux");
        let updates = fs::read_to_string(Path::new(&staging).join("Updates.xml")).unwrap();
        assert!(updates.contains("<Version>1.1</Version>"));
        assert!(fs::read_dir(home.join("ifw_tools")).unwrap().next().is_none());
        assert!(!Path::new(&remote_join(&layout.pending_path(), "qt6/linux/pkg")).exists());
    }
}
