use std::{
    ffi::OsString,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use rpmrepo_config::tools::ToolSettings;
use tracing::{debug, trace, warn};

use super::{IndexTool, MergeTool, ToolError};
use crate::layout::{REPODATA_DIR, REPOMD_FILE};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL: usize = 4096;

/// `createrepo_c` / `mergerepo_c` driven as child processes.
#[derive(Debug, Clone)]
pub struct Createrepo {
    createrepo: String,
    mergerepo: String,
    timeout: Duration,
    compatibility: bool,
}

impl Createrepo {
    pub fn new(createrepo: &str, mergerepo: &str, timeout: Duration) -> Self {
        Self {
            createrepo: createrepo.to_string(),
            mergerepo: mergerepo.to_string(),
            timeout,
            compatibility: true,
        }
    }

    pub fn from_settings(settings: &ToolSettings) -> rpmrepo_config::error::Result<Self> {
        Ok(Self::new(
            settings.createrepo(),
            settings.mergerepo(),
            settings.timeout()?,
        )
        .compatibility(settings.compatibility()))
    }

    pub fn compatibility(mut self, enabled: bool) -> Self {
        self.compatibility = enabled;
        self
    }

    fn expect_repomd(&self, tool: &str, dir: &Path) -> Result<(), ToolError> {
        let repomd = dir.join(REPODATA_DIR).join(REPOMD_FILE);
        if repomd.is_file() {
            Ok(())
        } else {
            Err(ToolError::MissingOutput {
                tool: tool.to_string(),
                path: repomd,
            })
        }
    }
}

impl IndexTool for Createrepo {
    fn index(&self, repo_dir: &Path) -> Result<(), ToolError> {
        let mut args: Vec<OsString> = Vec::new();
        if self.compatibility {
            args.push("--compatibility".into());
        }
        args.push(repo_dir.into());

        run_tool(&self.createrepo, &args, self.timeout)?;
        self.expect_repomd(&self.createrepo, repo_dir)
    }
}

impl MergeTool for Createrepo {
    fn merge(&self, repos: &[PathBuf], output_dir: &Path) -> Result<(), ToolError> {
        let mut args: Vec<OsString> = vec![
            "-d".into(),
            "--all".into(),
            "--omit-baseurl".into(),
            "--compress-type=gz".into(),
            "--outputdir".into(),
            output_dir.into(),
        ];
        for repo in repos {
            args.push("--repo".into());
            args.push(repo.into());
        }

        run_tool(&self.mergerepo, &args, self.timeout)?;
        self.expect_repomd(&self.mergerepo, output_dir)
    }
}

/// Runs `tool` to completion, killing it once `timeout` has passed.
pub(crate) fn run_tool(tool: &str, args: &[OsString], timeout: Duration) -> Result<(), ToolError> {
    debug!(tool, ?args, "running external tool");

    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            ToolError::Spawn {
                tool: tool.to_string(),
                source: err,
            }
        })?;

    // Drained on a separate thread so a chatty tool cannot fill the pipe and stall.
    let stderr_reader = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                warn!(tool, ?timeout, "external tool timed out, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout {
                    tool: tool.to_string(),
                    after: timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                return Err(ToolError::Spawn {
                    tool: tool.to_string(),
                    source: err,
                });
            }
        }
    };

    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| stderr_tail(&buf))
        .unwrap_or_default();
    trace!(tool, elapsed = ?started.elapsed(), %status, "external tool finished");

    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Rejected {
            tool: tool.to_string(),
            status: status.code(),
            stderr,
        })
    }
}

fn stderr_tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_run_tool_success() {
        run_tool("sh", &args(&["-c", "exit 0"]), Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_run_tool_failure_captures_stderr() {
        let err = run_tool(
            "sh",
            &args(&["-c", "echo corrupt package >&2; exit 3"]),
            Duration::from_secs(10),
        )
        .unwrap_err();

        match err {
            ToolError::Rejected { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "corrupt package");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_tool_timeout() {
        let started = Instant::now();
        let err = run_tool("sleep", &args(&["10"]), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_tool_missing_binary() {
        let err = run_tool(
            "rpmrepo-definitely-not-installed",
            &[],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_index_requires_repomd() {
        let dir = tempdir().unwrap();
        // `true` accepts any arguments and writes nothing.
        let tool = Createrepo::new("true", "true", Duration::from_secs(10));
        let err = tool.index(dir.path()).unwrap_err();
        assert!(matches!(err, ToolError::MissingOutput { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_stderr_tail() {
        let long = vec![b'x'; STDERR_TAIL + 10];
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL);
        assert_eq!(stderr_tail(b"  oops \n"), "oops");
    }
}
