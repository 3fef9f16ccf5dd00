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

use codebox_protocol::ExecChunk;
use regex::Regex;
use serde::Deserialize;

/// A message emitted by the interpreter's message bus. This mirrors the
/// subset of the Jupyter kernel message taxonomy the classifier cares
/// about. It never crosses the wire; it only exists inside the kernel
/// driver as the input to [`classify`]. `kind` matches the JSON the
/// bootstrap script in `kernel/bootstrap.py` emits, one object per line.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawKernelEvent {
    /// Raw stdout/stderr text forwarded through the kernel's iopub stream.
    Stream { text: String },
    /// The textual rendering of a cell's trailing expression value.
    ExecuteResult { text: String },
    /// A rich display publish. `png_base64` is set when the bundle
    /// contained an `image/png` entry; `plain_text` holds a
    /// `text/plain` fallback when no image was present.
    DisplayData {
        #[serde(default)]
        png_base64: Option<String>,
        #[serde(default)]
        plain_text: Option<String>,
    },
    /// An uncaught exception.
    Error { ename: String, evalue: String },
    /// Kernel execution-state transition. `idle` with a matching parent
    /// message id marks the end of one `exec` call's output.
    Status { idle: bool, parent_id: String },
}

/// The cumulative truncation limit applied to a single `exec` call's text
/// output: once more than this many characters of `txt` have been emitted,
/// the stream is truncated from the front and prefixed with `"[...]\n"`.
pub const TEXT_TRUNCATE_LIMIT: usize = 500;

const REQUIREMENT_SATISFIED_MARKER: &str = "Requirement already satisfied";

/// The outcome of classifying one [`RawKernelEvent`].
pub enum Classified {
    /// Emit these chunks (zero or more — a display_data with an `<image>`
    /// sentinel embedded in stream text can yield several).
    Chunks(Vec<ExecChunk>),
    /// This event carries no output (e.g. a dropped pip-install notice).
    Nothing,
    /// This event marks the end of the current `exec` call's stream.
    EndOfStream,
}

/// Classify one kernel event into zero or more output chunks, per the
/// interp-kernel classification table.
///
/// `parent_id` is the message id of the `execute_request` this call is
/// waiting on; only a `status` event whose `parent_id` matches ends the
/// stream.
pub fn classify(event: RawKernelEvent, parent_id: &str) -> Classified {
    match event {
        RawKernelEvent::Stream { text } => {
            if text.contains(REQUIREMENT_SATISFIED_MARKER) {
                Classified::Nothing
            } else {
                Classified::Chunks(split_image_sentinels(&text))
            }
        }
        RawKernelEvent::ExecuteResult { text } => {
            Classified::Chunks(split_image_sentinels(&text))
        }
        RawKernelEvent::DisplayData { png_base64: Some(png), .. } => {
            Classified::Chunks(vec![ExecChunk::img(png)])
        }
        RawKernelEvent::DisplayData { png_base64: None, plain_text: Some(text) } => {
            Classified::Chunks(split_image_sentinels(&text))
        }
        RawKernelEvent::DisplayData { png_base64: None, plain_text: None } => Classified::Nothing,
        RawKernelEvent::Error { ename, evalue } => {
            Classified::Chunks(vec![ExecChunk::err(format!("{ename}: {evalue}"))])
        }
        RawKernelEvent::Status { idle: true, parent_id: ref pid } if pid == parent_id => {
            Classified::EndOfStream
        }
        RawKernelEvent::Status { .. } => Classified::Nothing,
    }
}

/// Split `<image>...</image>` sentinels (emitted by the display-hook
/// bootstrap when a plot is rendered) out of a block of text, preserving
/// emission order: surrounding text becomes `txt` chunks, each sentinel
/// body becomes one `img` chunk.
pub fn split_image_sentinels(text: &str) -> Vec<ExecChunk> {
    thread_local! {
        static SENTINEL: Regex =
            Regex::new(r"(?s)<image>(.*?)</image>").expect("static regex is valid");
    }

    let mut chunks = Vec::new();
    let mut last_end = 0;
    SENTINEL.with(|re| {
        for caps in re.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if whole.start() > last_end {
                chunks.push(ExecChunk::txt(&text[last_end..whole.start()]));
            }
            chunks.push(ExecChunk::img(caps.get(1).unwrap().as_str()));
            last_end = whole.end();
        }
    });
    if last_end < text.len() {
        chunks.push(ExecChunk::txt(&text[last_end..]));
    }
    if chunks.is_empty() && !text.is_empty() {
        chunks.push(ExecChunk::txt(text));
    }
    chunks
}

/// Accumulates `txt` output across one `exec` call, truncating from the
/// front once the cumulative length exceeds [`TEXT_TRUNCATE_LIMIT`].
///
/// Only `txt` chunks count against the limit; images and errors pass
/// through untouched. `tail` holds the last `TEXT_TRUNCATE_LIMIT` chars
/// seen across the whole call, not just the current chunk, so a run of
/// small chunks truncates the same as one big one would.
#[derive(Default)]
pub struct TextTruncator {
    tail: std::collections::VecDeque<char>,
    total_len: usize,
}

impl TextTruncator {
    pub fn new() -> Self {
        TextTruncator::default()
    }

    /// Feed one chunk through the truncator, returning the chunk that
    /// should actually be emitted (unchanged for non-`txt` chunks).
    pub fn feed(&mut self, chunk: ExecChunk) -> ExecChunk {
        if chunk.kind != codebox_protocol::ChunkType::Txt {
            return chunk;
        }
        for c in chunk.content.chars() {
            self.total_len += 1;
            if self.tail.len() == TEXT_TRUNCATE_LIMIT {
                self.tail.pop_front();
            }
            self.tail.push_back(c);
        }
        if self.total_len <= TEXT_TRUNCATE_LIMIT {
            return chunk;
        }
        let tail: String = self.tail.iter().collect();
        ExecChunk::txt(format!("[...]\n{tail}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drops_pip_requirement_satisfied_noise() {
        let event = RawKernelEvent::Stream {
            text: "Requirement already satisfied: numpy in /usr/lib".to_string(),
        };
        assert!(matches!(classify(event, "abc"), Classified::Nothing));
    }

    #[test]
    fn stream_becomes_txt() {
        let event = RawKernelEvent::Stream { text: "hello\n".to_string() };
        match classify(event, "abc") {
            Classified::Chunks(chunks) => {
                assert_eq!(chunks, vec![ExecChunk::txt("hello\n")]);
            }
            _ => panic!("expected chunks"),
        }
    }

    #[test]
    fn execute_result_becomes_txt() {
        let event = RawKernelEvent::ExecuteResult { text: "42".to_string() };
        match classify(event, "abc") {
            Classified::Chunks(chunks) => assert_eq!(chunks, vec![ExecChunk::txt("42")]),
            _ => panic!("expected chunks"),
        }
    }

    #[test]
    fn display_data_with_png_becomes_img() {
        let event = RawKernelEvent::DisplayData {
            png_base64: Some("aGVsbG8=".to_string()),
            plain_text: Some("<Figure size 640x480>".to_string()),
        };
        match classify(event, "abc") {
            Classified::Chunks(chunks) => {
                assert_eq!(chunks, vec![ExecChunk::img("aGVsbG8=")]);
            }
            _ => panic!("expected chunks"),
        }
    }

    #[test]
    fn display_data_with_only_text_becomes_txt() {
        let event =
            RawKernelEvent::DisplayData { png_base64: None, plain_text: Some("repr".to_string()) };
        match classify(event, "abc") {
            Classified::Chunks(chunks) => assert_eq!(chunks, vec![ExecChunk::txt("repr")]),
            _ => panic!("expected chunks"),
        }
    }

    #[test]
    fn error_becomes_ename_evalue_err() {
        let event = RawKernelEvent::Error {
            ename: "ZeroDivisionError".to_string(),
            evalue: "division by zero".to_string(),
        };
        match classify(event, "abc") {
            Classified::Chunks(chunks) => {
                assert_eq!(chunks, vec![ExecChunk::err("ZeroDivisionError: division by zero")]);
            }
            _ => panic!("expected chunks"),
        }
    }

    #[test]
    fn matching_idle_status_ends_stream() {
        let event = RawKernelEvent::Status { idle: true, parent_id: "abc".to_string() };
        assert!(matches!(classify(event, "abc"), Classified::EndOfStream));
    }

    #[test]
    fn non_matching_idle_status_is_ignored() {
        let event = RawKernelEvent::Status { idle: true, parent_id: "other".to_string() };
        assert!(matches!(classify(event, "abc"), Classified::Nothing));
    }

    #[test]
    fn splits_image_sentinel_from_surrounding_text() {
        let chunks = split_image_sentinels("before<image>aGk=</image>after");
        assert_eq!(
            chunks,
            vec![ExecChunk::txt("before"), ExecChunk::img("aGk="), ExecChunk::txt("after")]
        );
    }

    #[test]
    fn text_with_no_sentinel_is_one_txt_chunk() {
        let chunks = split_image_sentinels("just text");
        assert_eq!(chunks, vec![ExecChunk::txt("just text")]);
    }

    #[test]
    fn truncator_passes_short_output_through() {
        let mut truncator = TextTruncator::new();
        let chunk = truncator.feed(ExecChunk::txt("short"));
        assert_eq!(chunk.content, "short");
    }

    #[test]
    fn truncator_truncates_once_limit_exceeded() {
        let mut truncator = TextTruncator::new();
        let long = "x".repeat(TEXT_TRUNCATE_LIMIT + 100);
        let chunk = truncator.feed(ExecChunk::txt(long));
        assert!(chunk.content.starts_with("[...]\n"));
        assert_eq!(chunk.content.len(), "[...]\n".len() + TEXT_TRUNCATE_LIMIT);
    }

    #[test]
    fn truncator_accumulates_across_small_chunks() {
        let mut truncator = TextTruncator::new();
        let mut last = ExecChunk::txt("");
        for _ in 0..(TEXT_TRUNCATE_LIMIT + 100) {
            last = truncator.feed(ExecChunk::txt("x"));
        }
        assert!(last.content.starts_with("[...]\n"));
        assert_eq!(last.content.chars().count(), "[...]\n".chars().count() + TEXT_TRUNCATE_LIMIT);
    }

    #[test]
    fn truncator_never_splits_inside_a_multibyte_char() {
        let mut truncator = TextTruncator::new();
        let long = "\u{1F600}".repeat(TEXT_TRUNCATE_LIMIT + 1);
        let chunk = truncator.feed(ExecChunk::txt(long));
        assert!(chunk.content.starts_with("[...]\n"));
        assert_eq!(chunk.content.chars().filter(|c| *c == '\u{1F600}').count(), TEXT_TRUNCATE_LIMIT);
    }
}
