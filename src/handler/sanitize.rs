//! Removal of terminal control sequences from pty output.
//!
//! This only drops sequences; nothing is interpreted, so cursor movement
//! or screen clears simply disappear from the text.

use vte::{Params, Parser, Perform};

/// Strip ANSI escape codes from a complete buffer.
pub fn strip_ansi(input: &[u8]) -> String {
    AnsiStripper::new().feed(input)
}

/// Streaming control-sequence stripper.
///
/// Parser state survives between calls to [`feed`](Self::feed), so a
/// sequence split across two reads is still removed.
pub struct AnsiStripper {
    parser: Parser,
    text: PlainText,
}

impl AnsiStripper {
    /// Create a stripper with fresh parser state.
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            text: PlainText::default(),
        }
    }

    /// Feed the next chunk and return the printable text it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.parser.advance(&mut self.text, chunk);
        self.text.take()
    }
}

impl Default for AnsiStripper {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct PlainText {
    output: Vec<u8>,
}

impl PlainText {
    fn take(&mut self) -> String {
        let bytes = std::mem::take(&mut self.output);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Perform for PlainText {
    fn print(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.output
            .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        // newline, carriage return, tab
        if matches!(byte, 0x0A | 0x0D | 0x09) {
            self.output.push(byte);
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(
        &mut self,
        _params: &Params,
        _intermediates: &[u8],
        _ignore: bool,
        _action: char,
    ) {
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}
