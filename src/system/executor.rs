// src/system/executor.rs
//
// Spawns one project command step and streams its output line by line.
// Cancellation kills the child process; a trailing line without a newline
// is still delivered.

use crate::CancellationToken;
use crate::models::ShellMode;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed reading process output: {0}")]
    Io(#[from] std::io::Error),
    #[error("'{command}' exited with code {code}")]
    NonZeroExit { command: String, code: i32 },
    #[error("Execution was cancelled")]
    Cancelled,
}

/// One fully resolved step, ready to spawn.
#[derive(Debug)]
pub struct ExecutionRequest {
    pub command: String,
    pub arguments: Vec<String>,
    pub shell: ShellMode,
    pub working_dir: PathBuf,
    /// Extra environment merged over the inherited process environment.
    pub env: Vec<(String, String)>,
    pub cancellation: CancellationToken,
}

/// A single output line from the child, in arrival order across both pipes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub stderr: bool,
}

/// Runs the step to completion, feeding every output line to `on_line`.
///
/// Returns `Cancelled` when the token fired first, `NonZeroExit` for a
/// non-zero exit code.
pub async fn execute<F>(request: ExecutionRequest, mut on_line: F) -> Result<(), ExecutionError>
where
    F: FnMut(OutputLine),
{
    let mut command = build_command(&request);
    command
        .current_dir(&request.working_dir)
        .envs(request.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
        command: request.command.clone(),
        source,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, false, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, true, tx.clone());
    }
    drop(tx);

    let mut exit: Option<ExitStatus> = None;
    let mut cancelled = false;

    // The channel closes once both pipes hit EOF, which can only happen
    // around process exit; keep draining until then.
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(line) => on_line(line),
                None => break,
            },
            status = child.wait(), if exit.is_none() => {
                exit = Some(status?);
            }
            () = request.cancellation.cancelled(), if !cancelled => {
                cancelled = true;
                let _ = child.start_kill();
            }
        }
    }

    let status = match exit {
        Some(status) => status,
        None => child.wait().await?,
    };

    if cancelled {
        return Err(ExecutionError::Cancelled);
    }
    if !status.success() {
        return Err(ExecutionError::NonZeroExit {
            command: request.command,
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

fn spawn_line_reader<R>(pipe: R, stderr: bool, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        // `lines` yields a final unterminated line too, so nothing is lost.
        while let Ok(Some(text)) = lines.next_line().await {
            if tx.send(OutputLine { text, stderr }).is_err() {
                break;
            }
        }
    });
}

fn build_command(request: &ExecutionRequest) -> Command {
    match &request.shell {
        ShellMode::Enabled(false) => {
            let mut command = Command::new(&request.command);
            command.args(&request.arguments);
            command
        }
        ShellMode::Enabled(true) => shell_command(default_shell(), &command_line(request)),
        ShellMode::Program(program) => shell_command(program, &command_line(request)),
    }
}

fn command_line(request: &ExecutionRequest) -> String {
    let mut line = request.command.clone();
    for argument in &request.arguments {
        line.push(' ');
        line.push_str(argument);
    }
    line
}

#[cfg(unix)]
fn default_shell() -> &'static str {
    "sh"
}

#[cfg(windows)]
fn default_shell() -> &'static str {
    "cmd"
}

#[cfg(unix)]
fn shell_command(shell: &str, line: &str) -> Command {
    let mut command = Command::new(shell);
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell_command(shell: &str, line: &str) -> Command {
    let mut command = Command::new(shell);
    if shell.to_ascii_lowercase().contains("cmd") {
        command.arg("/d").arg("/s").arg("/c").arg(line);
    } else {
        command.arg("-c").arg(line);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(command: &str) -> ExecutionRequest {
        ExecutionRequest {
            command: command.to_string(),
            arguments: Vec::new(),
            shell: ShellMode::Enabled(true),
            working_dir: std::env::temp_dir(),
            env: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    async fn collect(request: ExecutionRequest) -> (Result<(), ExecutionError>, Vec<OutputLine>) {
        let mut lines = Vec::new();
        let result = execute(request, |line| lines.push(line)).await;
        (result, lines)
    }

    #[tokio::test]
    async fn streams_stdout_lines_in_order() {
        let (result, lines) = collect(request("echo one; echo two")).await;

        assert!(result.is_ok());
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(lines.iter().all(|l| !l.stderr));
    }

    #[tokio::test]
    async fn stderr_lines_are_flagged() {
        let (result, lines) = collect(request("echo oops 1>&2")).await;

        assert!(result.is_ok());
        assert_eq!(lines, vec![OutputLine { text: "oops".to_string(), stderr: true }]);
    }

    #[tokio::test]
    async fn trailing_unterminated_output_is_delivered() {
        let (result, lines) = collect(request("printf no-newline")).await;

        assert!(result.is_ok());
        assert_eq!(lines[0].text, "no-newline");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_the_code() {
        let (result, _) = collect(request("exit 3")).await;

        let Err(ExecutionError::NonZeroExit { code, .. }) = result else {
            panic!("expected non-zero exit");
        };
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn direct_spawn_uses_argv() {
        let mut req = request("echo");
        req.shell = ShellMode::Enabled(false);
        req.arguments = vec!["plain $HOME".to_string()];

        let (result, lines) = collect(req).await;
        assert!(result.is_ok());
        // No shell, so no expansion happens.
        assert_eq!(lines[0].text, "plain $HOME");
    }

    #[tokio::test]
    async fn extra_env_is_visible_to_the_child() {
        let mut req = request("echo $MONORUN_TEST_VALUE");
        req.env = vec![("MONORUN_TEST_VALUE".to_string(), "visible".to_string())];

        let (_, lines) = collect(req).await;
        assert_eq!(lines[0].text, "visible");
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let req = request("sleep 5");
        let token = req.cancellation.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let (result, _) = collect(req).await;

        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
