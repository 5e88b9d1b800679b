//! Running external programs with a bounded wait.

use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    /// Whether the process exited successfully.
    pub success: bool,
    /// Everything written to standard output.
    pub stdout: String,
    /// Everything written to standard error.
    pub stderr: String,
}

/// Spawns a program, feeds it `input` on stdin and collects its output.
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, killing it once `timeout` elapsed.
    fn run(
        &self,
        program: &str,
        args: &[String],
        input: &str,
        timeout: Duration,
    ) -> io::Result<ProcessOutput>;
}

/// Runs programs with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl ProcessRunner for SystemProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        input: &str,
        timeout: Duration,
    ) -> io::Result<ProcessOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not captured"))?;
        let input = input.to_owned();
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                debug!(program, ?timeout, "killing optimizer process");
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{program} did not finish within {}s", timeout.as_secs()),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A program that exits without reading all of stdin closes the pipe early.
        let _ = writer.join();

        Ok(ProcessOutput {
            success: status.success(),
            stdout: join(stdout)?,
            stderr: join(stderr)?,
        })
    }
}

fn collect<R>(pipe: Option<R>) -> JoinHandle<io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut bytes)?;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    })
}

fn join(handle: JoinHandle<io::Result<String>>) -> io::Result<String> {
    handle
        .join()
        .map_err(|_| io::Error::other("output reader thread panicked"))?
}
