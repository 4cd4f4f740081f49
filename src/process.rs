// Runs the configured command for a resolved submission.
// The number of simultaneous processes per server is bounded by a semaphore,
// and each invocation is cut off after a fixed timeout.

use crate::{config::OutputType, error::GatewayError};
use std::{process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    process::Command,
    sync::Semaphore,
};
use tracing::{debug, warn};

// Replaced in command tokens with the path of the running gateway executable
pub const CURRENT_EXECUTABLE_PLACEHOLDER: &str = "$currentExecutable$";
// Older configuration files spell the same placeholder this way
pub const LEGACY_EXECUTABLE_PLACEHOLDER: &str = "$currentJava$";

// Maximum number of processes running at once for one server
pub const MAX_CONCURRENT_PROCESSES: usize = 5;

// Time limit of a single invocation, once it got a slot
pub const PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

// How long to wait for the exit status after all streams are closed
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Payload written to the standard input of the process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdinInput {
    // Standard input is closed without data
    #[default]
    NoValue,
    Text(String),
    Bytes(Vec<u8>),
}

impl StdinInput {
    fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::NoValue => None,
            Self::Text(text) => Some(text.as_bytes()),
            Self::Bytes(bytes) => Some(bytes),
        }
    }
}

/// Runs the command template of one server.
pub struct ProcessInvoker {
    command: Vec<String>,
    semaphore: Semaphore,
    timeout: Duration,
}

impl ProcessInvoker {
    pub fn new(command: Vec<String>) -> Self {
        Self::with_limits(command, MAX_CONCURRENT_PROCESSES, PROCESS_TIMEOUT)
    }

    pub fn with_limits(command: Vec<String>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            command,
            semaphore: Semaphore::new(max_concurrent),
            timeout,
        }
    }

    // Number of invocations that could start right now without waiting
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Runs the command with the given arguments and writes its standard output into `output`.
    ///
    /// Waits for a free slot first. If the invocation fails or times out, whatever was
    /// already written to `output` must be discarded by the caller.
    pub async fn submit<W>(
        &self,
        arguments: &[(String, String)],
        input: &StdinInput,
        output_type: OutputType,
        output: &mut W,
    ) -> Result<(), GatewayError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| GatewayError::Process(format!("Process slots unavailable: {}", e)))?;

        let current_executable = std::env::current_exe().map_err(|e| {
            GatewayError::Process(format!("Failed to resolve current executable: {}", e))
        })?;
        let argv = build_argv(
            &self.command,
            arguments,
            &current_executable.to_string_lossy(),
        );

        tokio::time::timeout(self.timeout, run_process(&argv, input, output_type, output))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }
}

/// Builds the argument vector: command tokens with the executable placeholder replaced,
/// followed by every `(key, value)` pair in order.
pub fn build_argv(
    command: &[String],
    arguments: &[(String, String)],
    current_executable: &str,
) -> Vec<String> {
    command
        .iter()
        .map(|token| {
            token
                .replace(CURRENT_EXECUTABLE_PLACEHOLDER, current_executable)
                .replace(LEGACY_EXECUTABLE_PLACEHOLDER, current_executable)
        })
        .chain(
            arguments
                .iter()
                .flat_map(|(key, value)| [key.clone(), value.clone()]),
        )
        .collect()
}

async fn run_process<W>(
    argv: &[String],
    input: &StdinInput,
    output_type: OutputType,
    output: &mut W,
) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin + Send,
{
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| GatewayError::Process("Command is empty".to_string()))?;

    debug!("Starting process: {:?}", argv);

    // The child is killed when this future is dropped, e.g. on timeout
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| GatewayError::Process(format!("Failed to start '{}': {}", program, e)))?;

    let pid = child.id().unwrap_or(0);
    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatewayError::Process("Standard output is not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| GatewayError::Process("Standard error is not captured".to_string()))?;

    let stdin_task = async move {
        if let (Some(mut stdin), Some(data)) = (stdin, input.as_bytes()) {
            stdin.write_all(data).await?;
            stdin.shutdown().await?;
        }
        // Dropping the handle closes the pipe
        Ok::<_, std::io::Error>(())
    };
    let stderr_task = log_stderr(stderr, pid);
    let stdout_task = relay_stdout(stdout, output_type, output);

    let (stdin_result, (), stdout_result) = tokio::join!(stdin_task, stderr_task, stdout_task);

    // A process that exits without reading its input is not a failure by itself
    if let Err(e) = stdin_result {
        warn!("Failed to write standard input of process {}: {}", pid, e);
    }
    stdout_result
        .map_err(|e| GatewayError::Process(format!("Failed to read standard output: {}", e)))?;

    let status = match tokio::time::timeout(EXIT_GRACE_PERIOD, child.wait()).await {
        Ok(status) => status
            .map_err(|e| GatewayError::Process(format!("Failed to wait for process: {}", e)))?,
        Err(_) => {
            let _ = child.start_kill();
            return Err(GatewayError::Process(format!(
                "Process {} did not exit within {:?} after closing its streams",
                pid, EXIT_GRACE_PERIOD
            )));
        }
    };

    if !status.success() {
        return Err(GatewayError::Process(format!(
            "Process {} exited with {}",
            pid, status
        )));
    }

    debug!("Process {} finished successfully", pid);
    Ok(())
}

async fn relay_stdout<R, W>(
    mut stdout: R,
    output_type: OutputType,
    output: &mut W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match output_type {
        OutputType::Binary => {
            tokio::io::copy(&mut stdout, output).await?;
        }
        OutputType::String => {
            let mut data = Vec::new();
            stdout.read_to_end(&mut data).await?;
            output
                .write_all(String::from_utf8_lossy(&data).as_bytes())
                .await?;
        }
    }
    output.flush().await
}

// Logs standard error line by line while the process runs
async fn log_stderr<R>(stderr: R, pid: u32)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    warn!("[process {} stderr] {}", pid, text);
                }
            }
            Err(e) => {
                warn!("Failed to read standard error of process {}: {}", pid, e);
                break;
            }
        }
    }
}
