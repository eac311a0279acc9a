//! Lifecycle shared by command and shell executors.
//!
//! `BaseExecutor` owns the channel, the stdin writer, the input stream
//! slots and the listener bookkeeping. The mode-specific executors drive it
//! through a fixed sequence: [`begin`](BaseExecutor::begin) →
//! [`open`](BaseExecutor::open) → [`wire`](BaseExecutor::wire) →
//! [`listen`](BaseExecutor::listen).

use std::any::Any;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use tracing::{debug, trace, warn};

use super::scheduler::{Scheduler, ThreadScheduler};
use super::state::{AtomicState, ExecutorState};
use crate::channel::{ChannelStreams, RemoteChannel};
use crate::error::RemoteExecError;
use crate::handler::{CloseFlag, StreamHandler};
use crate::Result;

/// Interrupt (Ctrl-C).
pub const CTRL_C: u8 = 0x03;
/// Suspend (Ctrl-Z).
pub const CTRL_Z: u8 = 0x1A;
/// Command sent by [`BaseExecutor::exit`].
pub const EXIT_COMMAND: &[u8] = b"exit";

/// Which kind of remote context an executor drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// One command, run to completion.
    Command,
    /// Interactive shell in a pseudo-terminal.
    Shell,
}

/// Delivered to the completion callback once every listener has finished.
#[derive(Debug)]
pub struct Completion {
    /// Mode of the executor that completed.
    pub mode: ExecMode,
    /// State after the listeners finished.
    pub state: ExecutorState,
    /// First error raised by a handler, if any.
    pub error: Option<RemoteExecError>,
}

impl Completion {
    /// True if no handler failed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub(crate) type CompletionCallback = Box<dyn FnOnce(&Completion) + Send>;

/// One input stream, closable from any thread.
///
/// The listener holds the lock only while it is inside `read`. `close()`
/// drops the reader right away when it can take the lock; otherwise the
/// listener drops it as soon as its in-flight read returns.
pub(crate) struct InputSlot {
    name: &'static str,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    closed: AtomicBool,
}

impl InputSlot {
    pub(crate) fn new(name: &'static str, reader: Box<dyn Read + Send>) -> Arc<Self> {
        Arc::new(Self {
            name,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        match self.reader.try_lock() {
            Ok(mut reader) => drop(reader.take()),
            Err(TryLockError::Poisoned(p)) => drop(p.into_inner().take()),
            Err(TryLockError::WouldBlock) => {
                trace!(stream = self.name, "input stream busy; listener will release it");
            }
        }
    }
}

/// The reader handed to a stream handler.
struct ListenerStream {
    slot: Arc<InputSlot>,
    close: CloseFlag,
}

impl Read for ListenerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.close.is_set() || self.slot.closed.load(Ordering::Acquire) {
            self.slot.close();
            return Ok(0);
        }
        let mut guard = self
            .slot
            .reader
            .lock()
            .map_err(|_| io::Error::other("input stream lock poisoned"))?;
        let result = match guard.as_mut() {
            Some(reader) => reader.read(buf),
            None => return Ok(0),
        };
        if self.slot.closed.load(Ordering::Acquire) {
            // Closed while this read was in flight.
            drop(guard.take());
            return Ok(result.unwrap_or(0));
        }
        result
    }
}

/// State the listener threads share with the executor.
struct Shared {
    mode: ExecMode,
    state: AtomicState,
    close: CloseFlag,
    done: AtomicBool,
    pending: AtomicUsize,
    error: Mutex<Option<RemoteExecError>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl Shared {
    /// Runs after each handler. The last listener to finish settles the
    /// state, raises the done flag and fires the callback.
    fn finish_listener(&self, name: &str, error: Option<RemoteExecError>) {
        if let Some(err) = error {
            warn!(listener = name, error = %err, "stream handler failed");
            if let Ok(mut first) = self.error.lock() {
                first.get_or_insert(err);
            }
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            trace!(listener = name, "listener finished; waiting for the others");
            return;
        }

        let error = self.error.lock().ok().and_then(|mut e| e.take());
        let target = if error.is_some() {
            ExecutorState::Failed
        } else {
            ExecutorState::Done
        };
        if self.state.load() == ExecutorState::Running {
            // exec() may have settled the state already; that wins.
            let _ = self.state.advance(target);
        }
        self.done.store(true, Ordering::Release);
        debug!(mode = ?self.mode, state = ?self.state.load(), "listeners finished");

        let callback = self.on_complete.lock().ok().and_then(|mut c| c.take());
        if let Some(callback) = callback {
            callback(&Completion {
                mode: self.mode,
                state: self.state.load(),
                error,
            });
        }
    }
}

/// A listener waiting to be scheduled.
pub(crate) struct Listener {
    pub(crate) name: &'static str,
    pub(crate) slot: Arc<InputSlot>,
    pub(crate) handler: StreamHandler,
}

/// Shared skeleton for driving a [`RemoteChannel`].
///
/// Writes, control bytes, state queries and `close()` all take `&self`, so
/// an executor can be wrapped in an `Arc` and closed from another thread
/// while `exec()` is blocked or listeners are mid-read.
pub struct BaseExecutor {
    channel: Arc<dyn RemoteChannel>,
    shared: Arc<Shared>,
    scheduler: Arc<dyn Scheduler>,
    handler: Mutex<Option<StreamHandler>>,
    started: AtomicBool,
    stdin: Mutex<Option<Box<dyn Write + Send>>>,
    inputs: Mutex<Vec<Arc<InputSlot>>>,
}

impl BaseExecutor {
    pub(crate) fn new(mode: ExecMode, channel: Box<dyn RemoteChannel>) -> Self {
        Self {
            channel: Arc::from(channel),
            shared: Arc::new(Shared {
                mode,
                state: AtomicState::default(),
                close: CloseFlag::new(),
                done: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                error: Mutex::new(None),
                on_complete: Mutex::new(None),
            }),
            scheduler: Arc::new(ThreadScheduler),
            handler: Mutex::new(None),
            started: AtomicBool::new(false),
            stdin: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_handler(&mut self, handler: StreamHandler) {
        *self
            .handler
            .get_mut()
            .unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    pub(crate) fn set_on_complete(&mut self, callback: CompletionCallback) {
        if let Ok(mut slot) = self.shared.on_complete.lock() {
            *slot = Some(callback);
        }
    }

    pub(crate) fn set_scheduler(&mut self, scheduler: Arc<dyn Scheduler>) {
        self.scheduler = scheduler;
    }

    pub(crate) fn channel(&self) -> &dyn RemoteChannel {
        self.channel.as_ref()
    }

    /// Guard against re-entry and take the primary handler.
    pub(crate) fn begin(&self) -> Result<StreamHandler> {
        if self.is_closed() {
            return Err(RemoteExecError::Configuration(
                "executor is closed".into(),
            ));
        }
        let mut handler = self
            .handler
            .lock()
            .map_err(|_| RemoteExecError::LockPoisoned)?;
        if self.started.load(Ordering::Acquire) {
            return Err(RemoteExecError::Configuration(
                "exec() may only be called once".into(),
            ));
        }
        let Some(h) = handler.take() else {
            return Err(RemoteExecError::Configuration(
                "no stream handler registered".into(),
            ));
        };
        self.started.store(true, Ordering::Release);
        Ok(h)
    }

    /// Run the mode-specific open. Any failure moves the state to FAILED.
    pub(crate) fn open<F>(&self, open: F) -> Result<ChannelStreams>
    where
        F: FnOnce(&dyn RemoteChannel) -> Result<ChannelStreams>,
    {
        open(self.channel.as_ref()).map_err(|e| {
            warn!(mode = ?self.shared.mode, error = %e, "failed to open channel");
            self.fail();
            e
        })
    }

    /// Install the opened streams. Fails if `close()` won the race while
    /// the channel was opening; the streams are released in that case.
    pub(crate) fn wire(
        &self,
        stdin: Box<dyn Write + Send>,
        inputs: Vec<Arc<InputSlot>>,
    ) -> Result<()> {
        {
            let mut slot = self.stdin.lock().map_err(|_| RemoteExecError::LockPoisoned)?;
            if slot.is_some() {
                return Err(RemoteExecError::Configuration(
                    "streams are already assigned".into(),
                ));
            }
            *slot = Some(stdin);
        }
        self.inputs
            .lock()
            .map_err(|_| RemoteExecError::LockPoisoned)?
            .extend(inputs);

        if self.is_closed() {
            self.close_streams();
            self.fail();
            return Err(RemoteExecError::closed());
        }
        Ok(())
    }

    pub(crate) fn mark_running(&self) -> Result<()> {
        self.shared.state.advance(ExecutorState::Running).map(|_| ())
    }

    /// Settle the state as DONE unless it is already terminal.
    pub(crate) fn succeed(&self) {
        let _ = self.shared.state.advance(ExecutorState::Done);
    }

    /// Settle the state as FAILED unless it is already terminal.
    pub(crate) fn fail(&self) {
        let _ = self.shared.state.advance(ExecutorState::Failed);
    }

    /// Start one background task per listener.
    ///
    /// Each task runs its handler inside `catch_unwind`, then reports to
    /// the shared latch whether the handler returned, failed or panicked.
    /// The completion callback fires once, after the last one.
    pub(crate) fn listen(&self, listeners: Vec<Listener>) -> Result<()> {
        self.shared
            .pending
            .store(listeners.len(), Ordering::Release);

        let mut listeners = listeners.into_iter();
        while let Some(Listener {
            name,
            slot,
            handler,
        }) = listeners.next()
        {
            let shared = Arc::clone(&self.shared);
            let task = Box::new(move || {
                let close = shared.close.clone();
                let mut stream = ListenerStream {
                    slot,
                    close: close.clone(),
                };
                trace!(listener = name, "listener started");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    handler(&mut stream as &mut dyn Read, &close)
                }));
                // finally
                let error = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) if close.is_set() => {
                        debug!(listener = name, "read error after close ignored: {}", e);
                        None
                    }
                    Ok(Err(e)) => Some(RemoteExecError::Stream(e)),
                    Err(payload) => Some(RemoteExecError::Stream(io::Error::other(format!(
                        "stream handler panicked: {}",
                        panic_message(payload.as_ref())
                    )))),
                };
                shared.finish_listener(name, error);
            });

            let thread_name = format!("remote-exec-{}", name);
            if let Err(e) = self.scheduler.spawn(&thread_name, task) {
                // These tasks never ran; count them as finished.
                self.shared
                    .finish_listener(name, Some(RemoteExecError::Schedule(e.to_string())));
                for rest in listeners {
                    self.shared.finish_listener(rest.name, None);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Read and drop a stream nobody handles, so the remote side never
    /// blocks on a full window. Not counted as a listener.
    pub(crate) fn drain(&self, slot: Arc<InputSlot>) -> Result<()> {
        let name = slot.name;
        let mut stream = ListenerStream {
            slot,
            close: self.shared.close.clone(),
        };
        let task = Box::new(move || {
            if let Err(e) = io::copy(&mut stream, &mut io::sink()) {
                trace!(stream = name, "drain stopped: {}", e);
            }
        });
        self.scheduler
            .spawn(&format!("remote-exec-{}-drain", name), task)
    }

    /// Write `bytes` to the remote stdin and flush immediately.
    ///
    /// # Errors
    ///
    /// [`RemoteExecError::Configuration`] before `exec()` has opened the
    /// streams, [`RemoteExecError::Stream`] after `close()` or when the
    /// transport rejects the write.
    pub fn write(&self, bytes: &[u8], append_newline: bool) -> Result<()> {
        if self.is_closed() {
            return Err(RemoteExecError::closed());
        }
        let mut stdin = self.stdin.lock().map_err(|_| RemoteExecError::LockPoisoned)?;
        let Some(writer) = stdin.as_mut() else {
            if self.is_closed() {
                return Err(RemoteExecError::closed());
            }
            return Err(RemoteExecError::Configuration(
                "streams are not open; call exec() first".into(),
            ));
        };
        writer.write_all(bytes)?;
        if append_newline {
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        trace!(bytes = bytes.len(), newline = append_newline, "wrote to remote stdin");
        Ok(())
    }

    /// Write `line` followed by a newline.
    pub fn write_line(&self, line: &str) -> Result<()> {
        self.write(line.as_bytes(), true)
    }

    /// Send Ctrl-C followed by a newline.
    pub fn interrupt(&self) -> Result<()> {
        self.write(&[CTRL_C], true)
    }

    /// Send Ctrl-Z followed by a newline.
    pub fn hang_up(&self) -> Result<()> {
        self.write(&[CTRL_Z], true)
    }

    /// Send `exit` followed by a newline.
    pub fn exit(&self) -> Result<()> {
        self.write(EXIT_COMMAND, true)
    }

    /// Release the stdin writer, then every input stream.
    fn close_streams(&self) {
        let writer = match self.stdin.lock() {
            Ok(mut stdin) => stdin.take(),
            Err(p) => p.into_inner().take(),
        };
        if let Some(mut writer) = writer {
            if let Err(e) = writer.flush() {
                debug!("flush on close failed: {}", e);
            }
            drop(writer);
        }

        let inputs = match self.inputs.lock() {
            Ok(mut inputs) => std::mem::take(&mut *inputs),
            Err(p) => std::mem::take(&mut *p.into_inner()),
        };
        for slot in inputs {
            slot.close();
        }
    }

    /// Close the executor. Idempotent and callable from any thread.
    ///
    /// The close flag is raised first so listeners stop at their next read.
    /// Then stdin, the input streams and finally the channel are closed; a
    /// failure on one of them is logged and does not stop the rest.
    ///
    /// An input stream whose listener is blocked inside `read` cannot be
    /// taken away from it. That stream is released by the listener once the
    /// channel close ends the read, so the order becomes stdin, channel,
    /// then the busy stream. Idle streams keep the stdin, stream, channel
    /// order.
    pub fn close(&self) {
        if self.shared.close.raise() {
            return;
        }
        debug!(mode = ?self.shared.mode, state = ?self.state(), "closing executor");
        self.close_streams();
        if let Err(e) = self.channel.close() {
            warn!("failed to close channel: {}", e);
        }
    }

    /// Exit status reported by the channel, if known yet.
    pub fn exit_code(&self) -> Option<i32> {
        self.channel.exit_status()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecutorState {
        self.shared.state.load()
    }

    /// Execution mode of this executor.
    pub fn mode(&self) -> ExecMode {
        self.shared.mode
    }

    /// True once every listener has finished.
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// True once `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.close.is_set()
    }

    /// True while the remote context is running.
    pub fn is_running(&self) -> bool {
        self.state() == ExecutorState::Running
    }
}

impl Drop for BaseExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;
    use std::io::Cursor;

    #[test]
    fn test_write_before_exec_is_configuration_error() {
        let base = BaseExecutor::new(ExecMode::Shell, Box::new(MockChannel::new()));
        let err = base.write(b"ls", true).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_write_after_close_is_stream_error() {
        let base = BaseExecutor::new(ExecMode::Shell, Box::new(MockChannel::new()));
        base.close();
        let err = base.write(b"ls", true).unwrap_err();
        assert!(err.is_stream());
    }

    #[test]
    fn test_begin_requires_handler() {
        let base = BaseExecutor::new(ExecMode::Command, Box::new(MockChannel::new()));
        assert!(matches!(base.begin(), Err(e) if e.is_configuration()));
        // A missing handler does not consume the single exec().
        assert!(!base.started.load(Ordering::Acquire));
    }

    #[test]
    fn test_begin_only_once() {
        let mut base = BaseExecutor::new(ExecMode::Command, Box::new(MockChannel::new()));
        base.set_handler(crate::handler::discard());
        assert!(base.begin().is_ok());
        assert!(matches!(base.begin(), Err(e) if e.is_configuration()));
    }

    #[test]
    fn test_slot_close_drops_reader_once() {
        let mock = MockChannel::new();
        let streams = mock.open_command("true", None).unwrap();
        let slot = InputSlot::new("stdout", streams.stdout);
        slot.close();
        slot.close();
        assert_eq!(mock.stdout_closes(), 1);
    }

    #[test]
    fn test_listener_stream_reads_eof_after_close() {
        let slot = InputSlot::new("stdout", Box::new(Cursor::new(b"data".to_vec())));
        let close = CloseFlag::new();
        let mut stream = ListenerStream {
            slot,
            close: close.clone(),
        };
        let mut buf = [0u8; 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        close.raise();
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    /// Yields `remaining` zero bytes, counting what was read.
    struct CountingReader {
        read: Arc<AtomicUsize>,
        remaining: usize,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.remaining);
            buf[..n].fill(0);
            self.remaining -= n;
            self.read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    #[test]
    fn test_drain_reads_to_eof_without_completing() {
        let base = BaseExecutor::new(ExecMode::Command, Box::new(MockChannel::new()));
        let read = Arc::new(AtomicUsize::new(0));
        let slot = InputSlot::new(
            "stderr",
            Box::new(CountingReader {
                read: Arc::clone(&read),
                remaining: 300_000,
            }),
        );
        base.drain(slot).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while read.load(Ordering::SeqCst) < 300_000 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(read.load(Ordering::SeqCst), 300_000);
        assert!(!base.is_done());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
