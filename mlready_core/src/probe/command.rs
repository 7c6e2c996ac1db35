use std::time::Duration;

use async_trait::async_trait;

/// Captured result of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// First non-empty line of stdout, falling back to stderr.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .map(str::trim)
            .find(|line| !line.is_empty())
    }

    /// Last non-empty line of stderr, which is where interpreters put the error.
    pub fn error_line(&self) -> Option<&str> {
        self.stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
    }
}

/// Seam between the prober and process spawning.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// `None` when the program could not be started or did not finish in time.
    async fn run(&self, program: &str, args: &[String]) -> Option<CommandOutput>;
}

pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Option<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => Some(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => {
                log::debug!("[probe] could not run {}: {}", program, e);
                None
            }
            Err(_) => {
                log::warn!("[probe] {} did not finish within {:?}", program, self.timeout);
                None
            }
        }
    }
}
