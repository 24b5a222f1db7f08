use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub fn now_epoch_secs() -> Result<u64> {
    u64::try_from(Utc::now().timestamp()).context("system clock is before the Unix epoch")
}

/// One display line: control characters dropped, cut at `max_chars` with a
/// trailing `…` when anything was left over.
pub fn preview_line(input: &str, max_chars: usize) -> String {
    let mut visible = input.chars().filter(|c| !c.is_control());
    let mut line: String = visible.by_ref().take(max_chars).collect();
    if visible.next().is_some() {
        line.push('…');
    }
    line
}

type PipeReader = JoinHandle<std::io::Result<Vec<u8>>>;

fn drain_pipe<R>(pipe: Option<R>) -> PipeReader
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect_pipe(reader: PipeReader, name: &str) -> Result<Vec<u8>> {
    reader
        .join()
        .map_err(|_| anyhow!("{name} reader thread panicked"))?
        .with_context(|| format!("failed to read child {name}"))
}

/// Run `cmd` to completion, killing it once `timeout` elapses. Both output
/// pipes are read concurrently so a child writing more than the pipe buffer
/// never stalls.
pub fn run_command_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = drain_pipe(child.stdout.take());
    let stderr = drain_pipe(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("command timed out after {}s", timeout.as_secs());
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: collect_pipe(stdout, "stdout")?,
        stderr: collect_pipe(stderr, "stderr")?,
    })
}
