//! Reply stream framing
//!
//! gdb terminates every reply with a literal `(gdb) \n` prompt line. The
//! framer buffers raw stdout bytes and cuts them into [`Batch`]es at each
//! prompt; a partial chunk simply stays buffered until the sentinel shows
//! up. At process exit any remainder is flushed as one final batch, the
//! only case where a batch has no trailing sentinel.

use serde::{Deserialize, Serialize};

/// The prompt sentinel terminating one complete reply.
pub const PROMPT: &[u8] = b"(gdb) \n";

/// One complete reply: the ordered non-empty lines between two prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    lines: Vec<String>,
}

impl Batch {
    pub(crate) fn from_bytes(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        Self {
            lines: text
                .split('\n')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Payloads of the lines whose leading marker character matches,
    /// marker stripped.
    pub fn with_marker(&self, marker: char) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter_map(move |l| l.strip_prefix(marker))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Accumulates raw gdb stdout and yields complete reply batches.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: Vec<u8>,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and cut out every complete batch it finishes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Batch> {
        self.buffer.extend_from_slice(chunk);
        let mut batches = Vec::new();
        while let Some(pos) = find_prompt(&self.buffer) {
            batches.push(Batch::from_bytes(&self.buffer[..pos]));
            self.buffer.drain(..pos + PROMPT.len());
        }
        batches
    }

    /// Flush whatever is still buffered as a terminal, sentinel-less batch.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        let batch = Batch::from_bytes(&self.buffer);
        self.buffer.clear();
        Some(batch)
    }
}

fn find_prompt(buffer: &[u8]) -> Option<usize> {
    buffer.windows(PROMPT.len()).position(|w| w == PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &[u8] = b"~\"hi\\n\"\n^done\n(gdb) \n";

    #[test]
    fn test_single_chunk() {
        let mut framer = StreamFramer::new();
        let batches = framer.push(REPLY);
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            Batch::from_lines(["~\"hi\\n\"", "^done"])
        );
    }

    #[test]
    fn test_split_at_any_offset_is_equivalent() {
        let whole = StreamFramer::new().push(REPLY);
        for split in 1..REPLY.len() {
            let mut framer = StreamFramer::new();
            let mut batches = framer.push(&REPLY[..split]);
            batches.extend(framer.push(&REPLY[split..]));
            assert_eq!(batches, whole, "split at byte {split}");
        }
    }

    #[test]
    fn test_no_sentinel_no_batch() {
        let mut framer = StreamFramer::new();
        assert!(framer.push(b"~\"partial\"\n^done\n(gdb").is_empty());
    }

    #[test]
    fn test_multiple_batches_in_one_chunk() {
        let mut framer = StreamFramer::new();
        let batches = framer.push(b"^done\n(gdb) \n*running\n(gdb) \n");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], Batch::from_lines(["^done"]));
        assert_eq!(batches[1], Batch::from_lines(["*running"]));
    }

    #[test]
    fn test_finish_flushes_remainder() {
        let mut framer = StreamFramer::new();
        assert!(framer.push(b"^exit\n").is_empty());
        assert_eq!(framer.finish(), Some(Batch::from_lines(["^exit"])));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_marker_filter() {
        let batch = Batch::from_lines(["~\"a\"", "*stopped", "^done", "~\"b\""]);
        let console: Vec<_> = batch.with_marker('~').collect();
        assert_eq!(console, ["\"a\"", "\"b\""]);
        assert_eq!(batch.with_marker('*').next(), Some("stopped"));
    }
}
