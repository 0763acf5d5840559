// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rendered terminal model for the text classifier.
//!
//! Child output is fed into an `avt` virtual terminal, which is the escape
//! sequence decoding layer: CSI/OSC/SGR and cursor movement are interpreted
//! instead of pattern-matched away, so the classifier sees what the user
//! sees. The classifier's sole input is the [`Screen::detection_window`].

/// Number of trailing non-empty rendered lines that form the detection window.
pub const DETECTION_WINDOW_LINES: usize = 5;

/// Opaque terminal screen backed by an avt virtual terminal.
pub struct Screen {
    vt: avt::Vt,
    seq: u64,
    /// Buffer for incomplete UTF-8 trailing bytes between `feed()` calls.
    utf8_buf: [u8; 3],
    utf8_buf_len: u8,
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen").field("seq", &self.seq).finish()
    }
}

/// Split `data` into the complete UTF-8 prefix and an incomplete trailing
/// sequence to carry into the next read.
///
/// A hard-invalid byte anywhere defeats the split; the whole buffer then
/// goes through lossy decoding instead of being buffered forever.
fn split_complete_utf8(data: &[u8]) -> (&[u8], &[u8]) {
    match std::str::from_utf8(data) {
        Ok(_) => (data, &[]),
        // `error_len() == None` marks an unexpected end of input: the tail
        // is a sequence still waiting for its continuation bytes.
        Err(e) if e.error_len().is_none() && data.len() - e.valid_up_to() <= 3 => {
            data.split_at(e.valid_up_to())
        }
        Err(_) => (data, &[]),
    }
}

/// Normalize box-drawing and common bullet glyphs to spaces so frame
/// characters don't leak into pattern rules.
pub fn normalize_line(line: &str) -> String {
    line.chars()
        .map(|c| match c {
            '\u{2500}'..='\u{257F}' => ' ', // box drawing
            '\u{2580}'..='\u{259F}' => ' ', // block elements
            '•' | '◦' | '▪' | '▸' | '●' | '○' | '◆' => ' ',
            other => other,
        })
        .collect()
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            vt: avt::Vt::new(cols as usize, rows as usize),
            seq: 0,
            utf8_buf: [0; 3],
            utf8_buf_len: 0,
        }
    }

    /// Feed raw bytes from the PTY into the virtual terminal.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        // Stitch bytes buffered from the previous call onto the front.
        let buffered = self.utf8_buf_len as usize;
        let joined: Vec<u8>;
        let input: &[u8] = if buffered == 0 {
            data
        } else {
            joined = self.utf8_buf[..buffered]
                .iter()
                .chain(data)
                .copied()
                .collect();
            self.utf8_buf_len = 0;
            &joined
        };

        let (complete, tail) = split_complete_utf8(input);
        self.utf8_buf[..tail.len()].copy_from_slice(tail);
        self.utf8_buf_len = tail.len() as u8;

        if !complete.is_empty() {
            let _ = self.vt.feed_str(&String::from_utf8_lossy(complete));
        }

        self.seq += 1;
    }

    /// All rendered screen lines, top to bottom.
    pub fn lines(&self) -> Vec<String> {
        self.vt.view().map(|line| line.text()).collect()
    }

    /// The detection window: the last [`DETECTION_WINDOW_LINES`] non-empty
    /// rendered lines after glyph normalization, in screen order.
    pub fn detection_window(&self) -> Vec<String> {
        let mut window: Vec<String> = self
            .vt
            .view()
            .map(|line| line.text())
            .filter(|l| !l.trim().is_empty())
            .map(|l| normalize_line(&l))
            .collect();
        let start = window.len().saturating_sub(DETECTION_WINDOW_LINES);
        window.drain(..start);
        window
    }

    /// Sequence number, incremented on each `feed`.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let _ = self.vt.resize(cols as usize, rows as usize);
    }
}

#[cfg(test)]
#[path = "screen_tests.rs"]
mod tests;
