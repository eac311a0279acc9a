//! Stream handlers.
//!
//! A handler is a caller-supplied function that drains one input stream on
//! a listener thread. It runs until the stream reports EOF or until it
//! observes the executor's [`CloseFlag`]. Once the executor is closed the
//! stream itself also reads as EOF, so handlers that only loop on `read`
//! terminate without checking the flag.
//!
//! ```
//! use remote_exec::handler;
//!
//! let on_stdout = handler::lines(|line| println!("remote: {}", line));
//! ```

mod sanitize;

pub use sanitize::{strip_ansi, AnsiStripper};

use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Boxed stream consumer run once on a listener thread.
pub type StreamHandler = Box<dyn FnOnce(&mut dyn Read, &CloseFlag) -> io::Result<()> + Send>;

/// Read chunk size used by the built-in handlers.
const READ_BUFFER_SIZE: usize = 4096;

/// Cross-thread flag raised when the executor is closed.
#[derive(Debug, Clone, Default)]
pub struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the owning executor has been closed.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the flag, returning whether it was already raised.
    pub(crate) fn raise(&self) -> bool {
        self.0.swap(true, Ordering::AcqRel)
    }
}

/// Call `on_line` for every newline-terminated line.
///
/// Bytes are decoded as lossy UTF-8 and the trailing `\n` / `\r\n` is
/// removed. A final line without a terminator is still delivered.
pub fn lines<F>(mut on_line: F) -> StreamHandler
where
    F: FnMut(&str) + Send + 'static,
{
    Box::new(move |stream: &mut dyn Read, close: &CloseFlag| {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        while !close.is_set() {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&line);
            on_line(text.trim_end_matches(['\n', '\r']));
        }
        Ok(())
    })
}

/// Like [`lines`], with terminal control sequences removed first.
///
/// Intended for pseudo-terminal output, which is full of colour and cursor
/// sequences. Sequences split across reads are handled.
pub fn sanitized_lines<F>(mut on_line: F) -> StreamHandler
where
    F: FnMut(&str) + Send + 'static,
{
    Box::new(move |stream: &mut dyn Read, close: &CloseFlag| {
        let mut stripper = AnsiStripper::new();
        let mut pending = String::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        while !close.is_set() {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            pending.push_str(&stripper.feed(&buf[..n]));
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                on_line(line.trim_end_matches(['\n', '\r']));
            }
        }
        if !pending.is_empty() {
            on_line(pending.trim_end_matches('\r'));
        }
        Ok(())
    })
}

/// Append every byte read to `buffer`.
pub fn collect(buffer: Arc<Mutex<Vec<u8>>>) -> StreamHandler {
    Box::new(move |stream: &mut dyn Read, close: &CloseFlag| {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        while !close.is_set() {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            buffer
                .lock()
                .map_err(|_| io::Error::other("output buffer poisoned"))?
                .extend_from_slice(&buf[..n]);
        }
        Ok(())
    })
}

/// Read and drop everything so the remote side never stalls on a full
/// window.
pub fn discard() -> StreamHandler {
    Box::new(|stream: &mut dyn Read, _close: &CloseFlag| {
        io::copy(stream, &mut io::sink())?;
        Ok(())
    })
}
