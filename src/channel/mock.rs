//! Scripted in-memory channel for tests.
//!
//! `MockChannel` is cheap to clone; every clone shares the same state, so a
//! test can hand one clone to an executor and keep another to inspect the
//! captured stdin and close counters afterwards.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{ChannelStreams, RemoteChannel, WaitCondition};
use crate::error::RemoteExecError;
use crate::Result;

/// What a scripted output stream produces.
#[derive(Debug, Clone, Default)]
enum Source {
    /// No output; EOF right away.
    #[default]
    Empty,
    /// Emit each chunk after its delay, then signal EOF.
    Chunks(Vec<(Duration, Vec<u8>)>),
    /// Never produce data; reads block until the channel is closed.
    Silent,
    /// Always return data immediately, like `yes`.
    Endless,
    /// Echo written lines back; an `exit [N]` line ends the stream.
    Echo,
}

#[derive(Debug, Default)]
struct Script {
    stdout: Source,
    stderr: Source,
    open_delay: Duration,
    open_error: Option<String>,
    exit_code: Option<i32>,
    exit_delay: Duration,
}

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    eof: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, bytes: &[u8]) {
        self.lock().data.extend(bytes);
        self.ready.notify_all();
    }

    fn finish(&self) {
        self.lock().eof = true;
        self.ready.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.lock().eof
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Ok(0);
            }
            if !state.data.is_empty() {
                let n = buf.len().min(state.data.len());
                for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.eof {
                return Ok(0);
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }
}

/// How many times each resource has been released.
#[derive(Debug, Default)]
struct Counters {
    stdin: AtomicUsize,
    stdout: AtomicUsize,
    stderr: AtomicUsize,
    channel: AtomicUsize,
}

#[derive(Debug, Default)]
struct MockState {
    script: Mutex<Script>,
    stdout: Pipe,
    stderr: Pipe,
    stdin: Mutex<Vec<u8>>,
    opened_at: Mutex<Option<Instant>>,
    opened_with: Mutex<Option<String>>,
    encoding: Mutex<Option<String>>,
    closed: AtomicBool,
    counters: Counters,
    releases: Mutex<Vec<&'static str>>,
}

impl MockState {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn released(&self, resource: &'static str) {
        self.releases
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(resource);
    }

    fn set_exit(&self, code: i32) {
        let mut script = self.script();
        script.exit_code = Some(code);
        script.exit_delay = Duration::ZERO;
    }
}

/// A scripted [`RemoteChannel`].
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    state: Arc<MockState>,
}

impl MockChannel {
    /// A channel whose streams are empty and which never reports an exit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stdout emits `bytes` right away, then EOF.
    pub fn stdout(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdout_chunks(vec![(Duration::ZERO, bytes.into())])
    }

    /// Stdout emits each chunk after sleeping for its delay, then EOF.
    pub fn stdout_chunks(self, chunks: Vec<(Duration, Vec<u8>)>) -> Self {
        self.state.script().stdout = Source::Chunks(chunks);
        self
    }

    /// Stderr emits `bytes` right away, then EOF.
    pub fn stderr(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stderr_chunks(vec![(Duration::ZERO, bytes.into())])
    }

    /// Stderr emits each chunk after sleeping for its delay, then EOF.
    pub fn stderr_chunks(self, chunks: Vec<(Duration, Vec<u8>)>) -> Self {
        self.state.script().stderr = Source::Chunks(chunks);
        self
    }

    /// Stdout never produces data and only ends when the channel closes.
    pub fn silent_stdout(self) -> Self {
        self.state.script().stdout = Source::Silent;
        self
    }

    /// Stdout produces data forever without blocking.
    pub fn endless_stdout(self) -> Self {
        self.state.script().stdout = Source::Endless;
        self
    }

    /// Stdout echoes every line written to stdin. A line starting with
    /// `exit` sets the exit status (default 0) and ends the stream.
    pub fn echo_shell(self) -> Self {
        self.state.script().stdout = Source::Echo;
        self
    }

    /// Report `code` as soon as the channel is opened.
    pub fn exits_with(self, code: i32) -> Self {
        self.exits_after(code, Duration::ZERO)
    }

    /// Report `code` once `delay` has passed since the channel was opened.
    pub fn exits_after(self, code: i32, delay: Duration) -> Self {
        {
            let mut script = self.state.script();
            script.exit_code = Some(code);
            script.exit_delay = delay;
        }
        self
    }

    /// Sleep for `delay` inside every open call.
    pub fn open_delay(self, delay: Duration) -> Self {
        self.state.script().open_delay = delay;
        self
    }

    /// Fail every open call with `message`.
    pub fn fail_open(self, message: impl Into<String>) -> Self {
        self.state.script().open_error = Some(message.into());
        self
    }

    /// Everything written to the stdin stream so far.
    pub fn written(&self) -> Vec<u8> {
        self.state
            .stdin
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Command text or pty type passed to the last open call.
    pub fn opened_with(&self) -> Option<String> {
        self.state.opened_with.lock().ok().and_then(|o| o.clone())
    }

    /// Encoding passed to the last `open_command`.
    pub fn encoding(&self) -> Option<String> {
        self.state.encoding.lock().ok().and_then(|e| e.clone())
    }

    /// Times the stdin stream has been dropped.
    pub fn stdin_closes(&self) -> usize {
        self.state.counters.stdin.load(Ordering::SeqCst)
    }

    /// Times the stdout stream has been dropped.
    pub fn stdout_closes(&self) -> usize {
        self.state.counters.stdout.load(Ordering::SeqCst)
    }

    /// Times the stderr stream has been dropped.
    pub fn stderr_closes(&self) -> usize {
        self.state.counters.stderr.load(Ordering::SeqCst)
    }

    /// Times `close()` actually tore the channel down.
    pub fn channel_closes(&self) -> usize {
        self.state.counters.channel.load(Ordering::SeqCst)
    }

    /// Resources in the order they were released: `stdin`, `stdout`,
    /// `stderr` and `channel`.
    pub fn release_order(&self) -> Vec<&'static str> {
        self.state
            .releases
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn open(&self, target: &str, encoding: Option<&str>) -> Result<(Source, Source)> {
        let (delay, error, stdout, stderr) = {
            let script = self.state.script();
            (
                script.open_delay,
                script.open_error.clone(),
                script.stdout.clone(),
                script.stderr.clone(),
            )
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if let Some(message) = error {
            return Err(RemoteExecError::ChannelOpen(message));
        }
        if self.is_closed() {
            return Err(RemoteExecError::ChannelOpen("channel is closed".into()));
        }
        if let Ok(mut opened) = self.state.opened_with.lock() {
            *opened = Some(target.to_string());
        }
        if let Ok(mut enc) = self.state.encoding.lock() {
            *enc = encoding.map(str::to_string);
        }
        if let Ok(mut at) = self.state.opened_at.lock() {
            *at = Some(Instant::now());
        }
        Ok((stdout, stderr))
    }

    fn reader(&self, source: Source, which: Stream) -> Box<dyn Read + Send> {
        match source {
            Source::Endless => Box::new(MockReader::endless(Arc::clone(&self.state), which)),
            Source::Silent | Source::Echo => {
                Box::new(MockReader::piped(Arc::clone(&self.state), which))
            }
            Source::Empty => {
                which.pipe(&self.state).finish();
                Box::new(MockReader::piped(Arc::clone(&self.state), which))
            }
            Source::Chunks(chunks) => {
                let state = Arc::clone(&self.state);
                std::thread::spawn(move || {
                    for (delay, bytes) in chunks {
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                        if state.closed.load(Ordering::SeqCst) {
                            return;
                        }
                        which.pipe(&state).push(&bytes);
                    }
                    which.pipe(&state).finish();
                });
                Box::new(MockReader::piped(Arc::clone(&self.state), which))
            }
        }
    }

    fn writer(&self, echo: bool) -> Box<dyn Write + Send> {
        Box::new(MockWriter {
            state: Arc::clone(&self.state),
            echo,
            line: Vec::new(),
        })
    }
}

impl RemoteChannel for MockChannel {
    fn open_command(&self, command: &str, encoding: Option<&str>) -> Result<ChannelStreams> {
        let (stdout, stderr) = self.open(command, encoding)?;
        let echo = matches!(stdout, Source::Echo);
        Ok(ChannelStreams {
            stdin: self.writer(echo),
            stdout: self.reader(stdout, Stream::Stdout),
            stderr: Some(self.reader(stderr, Stream::Stderr)),
        })
    }

    fn open_shell(&self, pty_type: &str) -> Result<ChannelStreams> {
        let (stdout, _) = self.open(pty_type, None)?;
        let echo = matches!(stdout, Source::Echo);
        Ok(ChannelStreams {
            stdin: self.writer(echo),
            stdout: self.reader(stdout, Stream::Stdout),
            stderr: None,
        })
    }

    fn wait_for(&self, condition: WaitCondition, timeout: Duration) -> Result<WaitCondition> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut observed = WaitCondition::NONE;
            if self.is_closed() {
                observed |= WaitCondition::CLOSED;
            }
            if self.state.stdout.is_finished() {
                observed |= WaitCondition::EOF;
            }
            if self.exit_status().is_some() {
                observed |= WaitCondition::EXIT_STATUS;
            }
            if observed.intersects(condition) {
                return Ok(observed);
            }
            if Instant::now() >= deadline {
                return Err(RemoteExecError::Timeout(timeout));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn exit_status(&self) -> Option<i32> {
        let opened_at = (*self.state.opened_at.lock().ok()?)?;
        let script = self.state.script();
        let code = script.exit_code?;
        (opened_at.elapsed() >= script.exit_delay).then_some(code)
    }

    fn close(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.counters.channel.fetch_add(1, Ordering::SeqCst);
        self.state.released("channel");
        // Wake blocked readers only after the release is recorded.
        self.state.stdout.close();
        self.state.stderr.close();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }

    fn pipe(self, state: &MockState) -> &Pipe {
        match self {
            Stream::Stdout => &state.stdout,
            Stream::Stderr => &state.stderr,
        }
    }

    fn counter(self, state: &MockState) -> &AtomicUsize {
        match self {
            Stream::Stdout => &state.counters.stdout,
            Stream::Stderr => &state.counters.stderr,
        }
    }
}

struct MockReader {
    state: Arc<MockState>,
    which: Stream,
    endless: bool,
}

impl MockReader {
    fn piped(state: Arc<MockState>, which: Stream) -> Self {
        Self {
            state,
            which,
            endless: false,
        }
    }

    fn endless(state: Arc<MockState>, which: Stream) -> Self {
        Self {
            state,
            which,
            endless: true,
        }
    }
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.endless {
            if self.state.closed.load(Ordering::SeqCst) || buf.is_empty() {
                return Ok(0);
            }
            let chunk = b"y\n";
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            return Ok(n);
        }
        self.which.pipe(&self.state).read(buf)
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.which.counter(&self.state).fetch_add(1, Ordering::SeqCst);
        self.state.released(self.which.name());
    }
}

struct MockWriter {
    state: Arc<MockState>,
    echo: bool,
    line: Vec<u8>,
}

impl MockWriter {
    fn echo_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        self.state.stdout.push(&line);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if let Some(rest) = text.strip_prefix("exit") {
            if rest.is_empty() || rest.starts_with(' ') {
                let code = rest.trim().parse().unwrap_or(0);
                self.state.set_exit(code);
                self.state.stdout.finish();
            }
        }
    }
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock channel closed"));
        }
        self.state
            .stdin
            .lock()
            .map_err(|_| io::Error::other("stdin buffer poisoned"))?
            .extend_from_slice(buf);
        if self.echo {
            for &byte in buf {
                self.line.push(byte);
                if byte == b'\n' {
                    self.echo_line();
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.state.counters.stdin.fetch_add(1, Ordering::SeqCst);
        self.state.released("stdin");
    }
}
