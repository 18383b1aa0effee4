//! Repository host reached with `ssh` and `rsync`.

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use super::RemoteFileOps;
use crate::error::{Error, Result};
use crate::runner::{run_command, CommandOutput};

/// Output lines that mean the remote end could not be reached at all.
const KNOWN_CONNECTION_ERRORS: &[&str] = &["Could not connect to the endpoint URL"];

const PROBE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub fn has_connection_error(output: &str) -> bool {
    output
        .lines()
        .any(|line| KNOWN_CONNECTION_ERRORS.iter().any(|known| line.contains(known)))
}

/// How often a remote command is retried after a connection error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 60s, 90s, 135s, 202s between five attempts
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(60),
            backoff: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Delays slept between attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.initial_delay;
        for _ in 1..self.attempts.max(1) {
            delays.push(delay);
            delay = delay.mul_f64(self.backoff);
        }
        delays
    }
}

#[derive(Debug, Clone)]
pub struct SshRemote {
    login: String,
    ssh_program: String,
    rsync_program: String,
    retry: RetryPolicy,
}

impl SshRemote {
    /// `login` is `user@host` or `host`.
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            ssh_program: "ssh".to_string(),
            rsync_program: "rsync".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_programs(mut self, ssh: impl Into<String>, rsync: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.rsync_program = rsync.into();
        self
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    fn login_args(&self, remote_command: String) -> Vec<String> {
        vec![
            "-t".to_string(),
            "-t".to_string(),
            self.login.clone(),
            remote_command,
        ]
    }

    /// Run a shell command line on the remote host, retrying on connection errors.
    fn exec(&self, remote_command: String, timeout: Duration) -> Result<CommandOutput> {
        let args = self.login_args(remote_command);
        let mut delays = self.retry.delays().into_iter();
        loop {
            let output = run_command(&self.ssh_program, &args, None, Some(timeout))?;
            if !has_connection_error(&output.combined()) {
                return Ok(output);
            }
            match delays.next() {
                Some(delay) => {
                    warn!("{}: connection error, trying again after {}s", self.login, delay.as_secs());
                    thread::sleep(delay);
                }
                None => {
                    error!("{}: remote command probably failed: {}", self.login, args.join(" "));
                    return Ok(output);
                }
            }
        }
    }

    fn exec_checked(&self, remote_command: String, timeout: Duration) -> Result<CommandOutput> {
        let output = self.exec(remote_command.clone(), timeout)?;
        if !output.success {
            return Err(Error::Command {
                cmd: format!("{} {} {}", self.ssh_program, self.login, remote_command),
                message: output.combined().trim().to_string(),
            });
        }
        Ok(output)
    }

    fn test_path(&self, flag: &str, path: &str) -> Result<bool> {
        let command = format!("test {} {} && echo OK || echo NOK", flag, quote(path));
        let output = self.exec(command, PROBE_TIMEOUT)?;
        Ok(output.stdout.trim() == "OK")
    }
}

fn quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

fn quote_all(values: &[String]) -> String {
    shell_words::join(values)
}

impl RemoteFileOps for SshRemote {
    fn describe(&self) -> String {
        self.login.clone()
    }

    fn dir_exists(&self, path: &str) -> Result<bool> {
        self.test_path("-d", path)
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        self.test_path("-f", path)
    }

    fn create_dirs(&self, paths: &[String]) -> Result<()> {
        self.exec_checked(format!("mkdir -p {}", quote_all(paths)), PROBE_TIMEOUT)?;
        Ok(())
    }

    fn delete_paths(&self, paths: &[String]) -> Result<()> {
        self.exec_checked(format!("rm -rf {}", quote_all(paths)), PROBE_TIMEOUT)?;
        Ok(())
    }

    fn copy_tree_contents(&self, source: &str, target: &str) -> Result<()> {
        let source_contents = format!("{}/.", source.trim_end_matches('/'));
        self.exec_checked(
            format!("cp -Rv {} {}", quote(&source_contents), quote(target)),
            TRANSFER_TIMEOUT,
        )?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let output = self.exec_checked(format!("ls -1A {}", quote(path)), PROBE_TIMEOUT)?;
        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.is_empty())
            .collect();
        names.sort();
        Ok(names)
    }

    fn list_tree(&self, path: &str) -> Result<Vec<String>> {
        let output = self.exec_checked(
            format!("find {} -mindepth 1 -printf '%P\\n'", quote(path)),
            PROBE_TIMEOUT,
        )?;
        let mut entries: Vec<String> = output
            .stdout
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.is_empty())
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn read_to_string(&self, path: &str) -> Result<Option<String>> {
        if !self.file_exists(path)? {
            return Ok(None);
        }
        let output = self.exec_checked(format!("cat {}", quote(path)), PROBE_TIMEOUT)?;
        Ok(Some(output.stdout.replace("\r\n", "\n")))
    }

    fn upload_dir(&self, local_source: &Path, dest: &str) -> Result<()> {
        info!("rsync {} -> {}:{}", local_source.display(), self.login, dest);
        let args = vec![
            "-avzh".to_string(),
            format!("{}/", local_source.display()),
            format!("{}:{}", self.login, dest),
        ];
        let output = run_command(&self.rsync_program, &args, None, Some(TRANSFER_TIMEOUT))?;
        if !output.success {
            return Err(Error::Command {
                cmd: format!("{} {}", self.rsync_program, args.join(" ")),
                message: output.combined().trim().to_string(),
            });
        }
        Ok(())
    }

    fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let mut words = vec![program.to_string()];
        words.extend(args.iter().cloned());
        self.exec(quote_all(&words), timeout)
    }
}
