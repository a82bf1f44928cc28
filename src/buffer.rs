//! Fixed-capacity connection buffers.
//!
//! `ReadBuf` owns the three parse cursors: `read` (end of valid data),
//! `checked` (next unexamined byte) and `line_start` (start of the current
//! logical line). Line scanning mutates the buffer only to null out the
//! terminator bytes, so header lines are handed out as zero-copy slices.

pub const READ_BUF_SIZE: usize = 2048;
pub const WRITE_BUF_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line sits at `line_start..checked` (terminator nulled).
    Ready,
    /// No terminator in the valid data yet.
    More,
    /// Stray CR or LF; the request is malformed.
    Bad,
}

pub struct ReadBuf {
    buf: Box<[u8]>,
    read: usize,
    checked: usize,
    line_start: usize,
}

impl ReadBuf {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            checked: 0,
            line_start: 0,
        }
    }

    pub fn reset(&mut self) {
        self.read = 0;
        self.checked = 0;
        self.line_start = 0;
    }

    pub fn is_full(&self) -> bool {
        self.read >= self.buf.len()
    }

    /// Writable tail for the next recv.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.read..]
    }

    /// Mark `n` freshly received bytes as valid.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.read + n <= self.buf.len());
        self.read += n;
    }

    pub fn read_pos(&self) -> usize {
        self.read
    }

    pub fn checked_pos(&self) -> usize {
        self.checked
    }

    /// Advance `checked` over valid data until a terminator is found.
    ///
    /// CRLF terminates a line; a CR as the very last valid byte means the LF
    /// may still be in flight. A CR followed by anything else, or an LF whose
    /// predecessor is not CR, is a syntax failure.
    pub fn scan_line(&mut self) -> LineStatus {
        while self.checked < self.read {
            match self.buf[self.checked] {
                b'\r' => {
                    if self.checked + 1 == self.read {
                        return LineStatus::More;
                    }
                    if self.buf[self.checked + 1] == b'\n' {
                        self.buf[self.checked] = 0;
                        self.buf[self.checked + 1] = 0;
                        self.checked += 2;
                        return LineStatus::Ready;
                    }
                    return LineStatus::Bad;
                }
                b'\n' => {
                    if self.checked > 0 && self.buf[self.checked - 1] == b'\r' {
                        self.buf[self.checked - 1] = 0;
                        self.buf[self.checked] = 0;
                        self.checked += 1;
                        return LineStatus::Ready;
                    }
                    return LineStatus::Bad;
                }
                _ => self.checked += 1,
            }
        }
        LineStatus::More
    }

    /// The line produced by the last successful `scan_line`, without the
    /// nulled terminator bytes.
    pub fn line(&self) -> &[u8] {
        let mut end = self.checked;
        while end > self.line_start && self.buf[end - 1] == 0 {
            end -= 1;
        }
        &self.buf[self.line_start..end]
    }

    /// Move `line_start` past the consumed line.
    pub fn advance_line(&mut self) {
        self.line_start = self.checked;
    }

    /// Body bytes available so far (everything past the header terminator).
    pub fn body(&self) -> &[u8] {
        &self.buf[self.checked..self.read]
    }
}

/// Append-only response header buffer with inline integer formatting.
pub struct WriteBuf {
    buf: Box<[u8]>,
    len: usize,
}

impl WriteBuf {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append raw bytes; `false` when the response no longer fits.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.len + bytes.len() > self.buf.len() {
            return false;
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    /// Append a decimal integer without going through fmt.
    pub fn push_uint(&mut self, value: usize) -> bool {
        let mut digits = [0u8; 20];
        let mut n = value;
        let mut i = 0;
        if n == 0 {
            digits[0] = b'0';
            i = 1;
        } else {
            while n > 0 {
                digits[i] = b'0' + (n % 10) as u8;
                n /= 10;
                i += 1;
            }
            digits[..i].reverse();
        }
        self.push(&digits[..i])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}
