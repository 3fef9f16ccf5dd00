// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use regex::Regex;
use thiserror::Error;

use crate::{ChunkType, ExecChunk};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame bytes were not valid utf8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

fn tag_to_kind(tag: &str) -> ChunkType {
    // The decoder's regex only ever matches these three alternatives.
    match tag {
        "txt" => ChunkType::Txt,
        "img" => ChunkType::Img,
        _ => ChunkType::Err,
    }
}

/// Decodes a stream of tagged-text frames (`<txt>..</txt>`, `<img>..</img>`,
/// `<err>..</err>`) into [`ExecChunk`]s as bytes arrive, possibly split
/// arbitrarily across reads.
///
/// Appends incoming bytes to an internal buffer, then repeatedly matches
/// and drains complete frames from the front.
pub struct FrameDecoder {
    pattern: Regex,
    buf: String,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder {
            // (?s) makes `.` match newlines, matching Python's re.DOTALL.
            pattern: Regex::new(r"(?s)^<(txt|img|err)>(.*?)</(txt|img|err)>")
                .expect("static regex is valid"),
            buf: String::new(),
        }
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly received bytes into the decoder, returning any complete
    /// chunks that could be decoded from the buffer so far.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<ExecChunk>, FrameError> {
        self.buf.push_str(std::str::from_utf8(bytes)?);
        self.drain()
    }

    fn drain(&mut self) -> Result<Vec<ExecChunk>, FrameError> {
        let mut chunks = Vec::new();
        loop {
            let Some(caps) = self.pattern.captures(&self.buf) else { break };
            let open_tag = caps.get(1).unwrap().as_str();
            let close_tag = caps.get(3).unwrap().as_str();
            if open_tag != close_tag {
                break;
            }
            let kind = tag_to_kind(open_tag);
            let content = caps.get(2).unwrap().as_str().to_string();
            let whole = caps.get(0).unwrap();
            let end = whole.end();
            chunks.push(ExecChunk { kind, content });
            self.buf.drain(..end);
        }
        Ok(chunks)
    }

    /// True if there is buffered, not-yet-decoded data left over. A
    /// well-formed stream should leave this empty once the body ends.
    pub fn has_trailing_data(&self) -> bool {
        !self.buf.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_single_frame() {
        let mut decoder = FrameDecoder::new();
        let chunks = decoder.push(b"<txt>hello</txt>").unwrap();
        assert_eq!(chunks, vec![ExecChunk::txt("hello")]);
        assert!(!decoder.has_trailing_data());
    }

    #[test]
    fn decodes_frame_split_across_pushes() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"<txt>hel").unwrap().is_empty());
        let chunks = decoder.push(b"lo</txt>").unwrap();
        assert_eq!(chunks, vec![ExecChunk::txt("hello")]);
    }

    #[test]
    fn decodes_multiple_frame_kinds_in_order() {
        let mut decoder = FrameDecoder::new();
        let chunks =
            decoder.push(b"<txt>one</txt><err>bad: oops</err><img>YWJj</img>").unwrap();
        assert_eq!(
            chunks,
            vec![ExecChunk::txt("one"), ExecChunk::err("bad: oops"), ExecChunk::img("YWJj")]
        );
    }

    #[test]
    fn frame_payload_may_span_newlines() {
        let mut decoder = FrameDecoder::new();
        let chunks = decoder.push(b"<txt>line one\nline two</txt>").unwrap();
        assert_eq!(chunks, vec![ExecChunk::txt("line one\nline two")]);
    }

    #[test]
    fn mismatched_tags_are_left_buffered() {
        let mut decoder = FrameDecoder::new();
        let chunks = decoder.push(b"<txt>oops</err>").unwrap();
        assert!(chunks.is_empty());
        assert!(decoder.has_trailing_data());
    }
}
