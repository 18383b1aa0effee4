//! External command execution with captured output and an optional timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Printable form of a command line.
pub fn describe(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().cloned());
    shell_words::join(parts)
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// A non-zero exit is reported through [`CommandOutput::success`], not as an
/// error. Spawn failures and timeouts are errors.
pub fn run_command(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let cmdline = describe(program, args);
    debug!("running: {}", cmdline);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(|e| Error::Command {
        cmd: cmdline.clone(),
        message: format!("failed to spawn: {}", e),
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(limit) => match wait_with_limit(&mut child, limit, &cmdline)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Command {
                    cmd: cmdline,
                    message: format!("timed out after {} s", limit.as_secs()),
                });
            }
        },
        None => child.wait().map_err(|e| Error::Command {
            cmd: cmdline.clone(),
            message: e.to_string(),
        })?,
    };

    let output = CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };
    debug!("{} exited with {:?}", cmdline, output.code);
    Ok(output)
}

/// Like [`run_command`] but a non-zero exit becomes [`Error::Command`].
pub fn run_checked(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let output = run_command(program, args, cwd, timeout)?;
    if !output.success {
        return Err(Error::Command {
            cmd: describe(program, args),
            message: format!(
                "exit status {:?}: {}",
                output.code,
                output.combined().trim()
            ),
        });
    }
    Ok(output)
}

fn wait_with_limit(
    child: &mut Child,
    limit: Duration,
    cmdline: &str,
) -> Result<Option<std::process::ExitStatus>> {
    child.wait_timeout(limit).map_err(|e| Error::Command {
        cmd: cmdline.to_string(),
        message: e.to_string(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
