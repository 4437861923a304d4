//! Line splitting over the transcoder's merged stdout/stderr pipe.

use std::io::{self, ErrorKind, Read};

const READ_CHUNK: usize = 4096;

/// Lazy sequence of output lines read from `R`.
///
/// Both `\n` and `\r` terminate a line, since ffmpeg redraws its progress
/// line with carriage returns. Empty lines are skipped and bytes are decoded
/// lossily. The sequence ends at end-of-stream or after the first read
/// error, which is yielded once.
pub struct LineRelay<R> {
    reader: R,
    pending: Vec<u8>,
    chunk: Box<[u8]>,
    finished: bool,
}

impl<R: Read> LineRelay<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            finished: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.truncate(pos);
            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
        None
    }

    fn take_remainder(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim_end().to_string();
        (!line.is_empty()).then_some(line)
    }
}

impl<R: Read> Iterator for LineRelay<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.take_line() {
                return Some(Ok(line));
            }
            if self.finished {
                return None;
            }

            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.finished = true;
                    return self.take_remainder().map(Ok);
                }
                Ok(n) => self.pending.extend_from_slice(&self.chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.finished = true;
                    self.pending.clear();
                    return Some(Err(err));
                }
            }
        }
    }
}
