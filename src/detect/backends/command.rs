use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionBatch;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL_BYTES: usize = 512;

/// Runs an external detector process.
///
/// The frame path is appended as the last argument. The process must print a JSON
/// array of `{label, bbox: [x1, y1, x2, y2], confidence}` objects on stdout and
/// exit with status 0. The whole call, including collecting output, is bounded by
/// `timeout`; on expiry the process is killed and an error is returned.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a full command line, e.g. `["python", "-u", "detect.py"]`.
    pub fn from_command_line(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("detector command must not be empty"))?;
        Ok(Self::new(program.clone(), args.to_vec(), timeout))
    }

    fn timed_out(&self) -> anyhow::Error {
        anyhow!(
            "detector '{}' timed out after {}ms",
            self.program,
            self.timeout.as_millis()
        )
    }

    fn wait_until(&self, child: &mut Child, deadline: Instant) -> Result<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.timed_out());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Output is complete only once every holder of the pipe has closed it, which
    /// may be a grandchild that outlives the detector process.
    fn collect_until(
        &self,
        output: &Receiver<std::io::Result<Vec<u8>>>,
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        match output.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(bytes) => bytes.context("failed to read detector output"),
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out()),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("detector pipe reader panicked")),
        }
    }
}

impl DetectorBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn detect(&mut self, frame: &Path) -> Result<DetectionBatch> {
        let deadline = Instant::now() + self.timeout;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(frame)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn detector '{}'", self.program))?;

        // Drain pipes on their own threads so a chatty detector cannot fill the
        // pipe buffer and stall until the deadline.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_until(&mut child, deadline)?;
        let stdout = self.collect_until(&stdout, deadline)?;
        let stderr = self.collect_until(&stderr, deadline)?;

        if !status.success() {
            return Err(anyhow!(
                "detector '{}' exited with {}: {}",
                self.program,
                status,
                tail(&stderr)
            ));
        }

        serde_json::from_slice(&stdout)
            .with_context(|| format!("detector '{}' produced invalid output", self.program))
    }
}

/// Reader threads are detached; one left blocked on a pipe held open elsewhere
/// ends when that holder exits.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<std::io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let res = pipe.read_to_end(&mut buf).map(|_| buf);
                let _ = tx.send(res);
            });
        }
        None => {
            let _ = tx.send(Ok(Vec::new()));
        }
    }
    rx
}

fn tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
