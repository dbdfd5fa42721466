use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, info};

use devfm_platform::command::PrivilegedCommand;
use devfm_platform::executor::{CommandResult, CommandRunner, ExecError};

/// Privileged executor: runs allow-listed commands directly or through a
/// non-interactive elevation helper (`sudo -n` by default).
pub struct SudoRunner {
    helper: String,
    timeout: Duration,
}

impl SudoRunner {
    pub fn new(helper: impl Into<String>, timeout: Duration) -> Self {
        Self {
            helper: helper.into(),
            timeout,
        }
    }

    fn build(&self, command: &PrivilegedCommand, elevate: bool) -> Command {
        let mut cmd = if elevate {
            let mut cmd = Command::new(&self.helper);
            cmd.arg("-n").arg("--").arg(command.program());
            cmd
        } else {
            Command::new(command.program())
        };
        cmd.args(command.args());
        cmd.env("LC_ALL", "C");
        cmd
    }
}

#[async_trait]
impl CommandRunner for SudoRunner {
    async fn run(&self, command: &PrivilegedCommand, elevate: bool) -> Result<CommandResult, ExecError> {
        let label = command.to_string();
        if elevate {
            info!("elevated: {} {}", self.helper, label);
        } else {
            debug!("running: {}", label);
        }

        let io_err = |source: io::Error| ExecError::Io {
            command: label.clone(),
            source,
        };

        // stdout and stderr share one pipe so the output keeps its interleaving
        let (reader, writer) = nix::unistd::pipe().map_err(|e| io_err(e.into()))?;
        let writer_err = writer.try_clone().map_err(io_err)?;

        let mut cmd = self.build(command, elevate);
        cmd.stdin(if command.stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(writer_err))
        .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: if elevate {
                self.helper.clone()
            } else {
                command.program().to_string()
            },
            source,
        })?;
        // release our copies of the write end, otherwise EOF never arrives
        drop(cmd);

        let mut output = tokio::fs::File::from_std(std::fs::File::from(reader));
        let stdin = child.stdin.take();
        let payload = command.stdin();

        let outcome = tokio::time::timeout(self.timeout, async {
            let feed = async move {
                if let (Some(mut pipe), Some(data)) = (stdin, payload) {
                    if let Err(e) = pipe.write_all(data).await {
                        if e.kind() != io::ErrorKind::BrokenPipe {
                            return Err(e);
                        }
                    }
                }
                Ok(())
            };
            let collect = async {
                let mut buf = Vec::new();
                output.read_to_end(&mut buf).await.map(|_| buf)
            };
            let (fed, collected) = tokio::join!(feed, collect);
            fed?;
            let buf = collected?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((buf, status))
        })
        .await;

        match outcome {
            Err(_) => {
                let _ = child.start_kill();
                error!("{} timed out after {}s", label, self.timeout.as_secs());
                Err(ExecError::Timeout {
                    command: label.clone(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(e)) => Err(io_err(e)),
            Ok(Ok((buf, status))) => {
                let code = status.code().unwrap_or(-1);
                if code != 0 {
                    debug!("{} exited with {}", label, code);
                }
                Ok(CommandResult::from_bytes(buf, code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn runner() -> SudoRunner {
        SudoRunner::new("sudo", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_read_file_captures_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "line one\nline two\n").unwrap();

        let result = runner()
            .run(&PrivilegedCommand::ReadFile { path: file }, false)
            .await
            .unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.output, "line one\nline two");
        assert_eq!(result.raw, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let result = runner()
            .run(
                &PrivilegedCommand::ReadFile {
                    path: PathBuf::from("/definitely/not/here"),
                },
                false,
            )
            .await
            .unwrap();
        assert_ne!(result.status, 0);
        // stderr is merged into the captured output
        assert!(result.output.contains("/definitely/not/here"));
    }

    #[tokio::test]
    async fn test_write_file_uses_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.txt");
        let result = runner()
            .run(
                &PrivilegedCommand::WriteFile {
                    path: file.clone(),
                    content: b"payload".to_vec(),
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(result.status, 0, "{}", result.output);
        assert_eq!(std::fs::read(&file).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_helper_is_spawn_error() {
        let runner = SudoRunner::new("/nonexistent/elevate", Duration::from_secs(5));
        let err = runner
            .run(&PrivilegedCommand::Touch { path: PathBuf::from("/tmp/x") }, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
