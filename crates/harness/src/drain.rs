//! Server console capture
//!
//! Both output channels are read concurrently, one line at a time, until
//! they close or the server process is reported gone. After the process has
//! exited only output already in flight is collected, so a descendant still
//! holding the pipes open does not keep the reader alive.
//!
//! Lines are sent over a channel as soon as they are read and survive a
//! reader that fails or is aborted.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::info;

use crate::error::{HarnessError, HarnessResult};

/// Tracing target used when echoing server output
pub const SERVER_LOG_TARGET: &str = "disttest::server";

/// How long output still in flight is read once the process has exited
pub const EXIT_FLUSH: Duration = Duration::from_millis(200);

type Line = (OutputStream, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Lines captured from a server run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedOutput {
    pub fn clear(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }

    pub fn push(&mut self, stream: OutputStream, line: String) {
        match stream {
            OutputStream::Stdout => self.stdout.push(line),
            OutputStream::Stderr => self.stderr.push(line),
        }
    }

    pub fn extend(&mut self, other: CapturedOutput) {
        self.stdout.extend(other.stdout);
        self.stderr.extend(other.stderr);
    }

    pub fn lines(&self, stream: OutputStream) -> &[String] {
        match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        }
    }

    /// Whether any stdout or stderr line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.iter().chain(self.stderr.iter()).any(|l| l.contains(needle))
    }
}

/// What a finished drain produced. Lines read before a failure are kept.
#[derive(Debug)]
pub struct DrainOutcome {
    pub output: CapturedOutput,
    pub result: HarnessResult<()>,
}

/// Read both streams until they close or `exited` turns true.
///
/// If the `exited` sender is dropped without reporting an exit, the streams
/// are read to the end.
pub async fn drain<O, E>(stdout: O, stderr: E, echo: bool, exited: watch::Receiver<bool>) -> DrainOutcome
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (sink, mut lines) = mpsc::unbounded_channel();
    let result = pump_both(stdout, stderr, echo, sink, exited).await;

    DrainOutcome {
        output: collect(&mut lines),
        result,
    }
}

async fn pump_both<O, E>(
    stdout: O,
    stderr: E,
    echo: bool,
    sink: mpsc::UnboundedSender<Line>,
    exited: watch::Receiver<bool>,
) -> HarnessResult<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (out_result, err_result) = tokio::join!(
        pump(stdout, OutputStream::Stdout, echo, sink.clone(), exited.clone()),
        pump(stderr, OutputStream::Stderr, echo, sink, exited),
    );
    out_result.and(err_result)
}

async fn pump<R>(
    reader: R,
    stream: OutputStream,
    echo: bool,
    sink: mpsc::UnboundedSender<Line>,
    mut exited: watch::Receiver<bool>,
) -> HarnessResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let read_error = |source: std::io::Error| HarnessError::StreamRead {
        stream: stream.as_str(),
        source,
    };

    loop {
        tokio::select! {
            biased;
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => return Ok(()),
                Ok(_) => emit(&sink, stream, echo, &mut buf),
                Err(source) => return Err(read_error(source)),
            },
            _ = process_exited(&mut exited) => break,
        }
    }

    // A read cancelled above leaves its partial line in `buf`
    let deadline = Instant::now() + EXIT_FLUSH;
    loop {
        match timeout_at(deadline, reader.read_until(b'\n', &mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(_)) => emit(&sink, stream, echo, &mut buf),
            Ok(Err(source)) => return Err(read_error(source)),
        }
    }
    if !buf.is_empty() {
        emit(&sink, stream, echo, &mut buf);
    }
    Ok(())
}

/// Resolves once `exited` is true; never, if the sender goes away first
async fn process_exited(exited: &mut watch::Receiver<bool>) {
    if exited.wait_for(|gone| *gone).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn emit(sink: &mpsc::UnboundedSender<Line>, stream: OutputStream, echo: bool, buf: &mut Vec<u8>) {
    let line = decode_line(buf);
    buf.clear();
    if echo {
        info!(target: SERVER_LOG_TARGET, stream = stream.as_str(), "{}", line);
    }
    // A closed receiver means nobody collects this run any more
    let _ = sink.send((stream, line));
}

/// Strip the line terminator; invalid UTF-8 is replaced rather than fatal
fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn collect(lines: &mut mpsc::UnboundedReceiver<Line>) -> CapturedOutput {
    let mut output = CapturedOutput::default();
    while let Ok((stream, line)) = lines.try_recv() {
        output.push(stream, line);
    }
    output
}

/// A drain running on its own task while the caller does something else.
pub struct DrainTask {
    handle: JoinHandle<HarnessResult<()>>,
    lines: mpsc::UnboundedReceiver<Line>,
}

impl DrainTask {
    pub fn spawn<O, E>(stdout: O, stderr: E, echo: bool, exited: watch::Receiver<bool>) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (sink, lines) = mpsc::unbounded_channel();
        Self {
            handle: tokio::spawn(pump_both(stdout, stderr, echo, sink, exited)),
            lines,
        }
    }

    /// Wait for the reader to finish, up to `bound`.
    ///
    /// A reader still running after `bound` is aborted and reported as a
    /// `DrainJoin` error. Lines it read before that are kept.
    pub async fn join(self, bound: Duration) -> DrainOutcome {
        let Self { mut handle, mut lines } = self;
        let result = match timeout(bound, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(HarnessError::DrainJoin(format!("output reader failed: {}", e))),
            Err(_) => {
                handle.abort();
                Err(HarnessError::DrainJoin(format!(
                    "output reader still running after {} ms",
                    bound.as_millis()
                )))
            }
        };

        DrainOutcome {
            output: collect(&mut lines),
            result,
        }
    }
}
