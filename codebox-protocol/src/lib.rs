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

use std::fmt;

use serde_derive::{Deserialize, Serialize};

mod frame;

pub use frame::{FrameDecoder, FrameError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// ChunkType tags every piece of output an [`ExecChunk`] can carry.
///
/// These are also the literal tag names used on the wire (`<txt>`, `<img>`,
/// `<err>`), so renaming a variant changes the protocol.
#[derive(Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Human-readable stdout, stream text, or a final expression value.
    Txt,
    /// A base64-encoded PNG, with no data-URI prefix.
    Img,
    /// Diagnostic text. Does not by itself terminate the stream.
    Err,
}

impl ChunkType {
    pub fn tag(self) -> &'static str {
        match self {
            ChunkType::Txt => "txt",
            ChunkType::Img => "img",
            ChunkType::Err => "err",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// ExecChunk is the unit of a streamed execution response.
///
/// A sequence of these, in interpreter emission order, makes up the body of
/// an `/exec` response. See [`FrameDecoder`] for how chunks are recovered
/// from the wire.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct ExecChunk {
    #[serde(rename = "type")]
    pub kind: ChunkType,
    pub content: String,
}

impl ExecChunk {
    pub fn txt<S: Into<String>>(content: S) -> Self {
        ExecChunk { kind: ChunkType::Txt, content: content.into() }
    }

    pub fn img<S: Into<String>>(content: S) -> Self {
        ExecChunk { kind: ChunkType::Img, content: content.into() }
    }

    pub fn err<S: Into<String>>(content: S) -> Self {
        ExecChunk { kind: ChunkType::Err, content: content.into() }
    }

    /// Render this chunk as the tagged-text frame that crosses the wire.
    ///
    /// The three tags are only safe delimiters because payloads never
    /// contain them: text/error payloads come from an interpreter, never
    /// from the caller's code, and image payloads are base64 (no `<`).
    pub fn write_frame(&self, out: &mut String) {
        let tag = self.kind.tag();
        out.push('<');
        out.push_str(tag);
        out.push('>');
        out.push_str(&self.content);
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

/// The union view of a fully collected chunk stream, used by clients that
/// don't need incremental delivery.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize, Debug)]
pub struct ExecResult {
    pub text: String,
    pub images: Vec<String>,
    pub errors: Vec<String>,
}

impl ExecResult {
    pub fn from_chunks<I: IntoIterator<Item = ExecChunk>>(chunks: I) -> Self {
        let mut result = ExecResult::default();
        for chunk in chunks {
            match chunk.kind {
                ChunkType::Txt => result.text.push_str(&chunk.content),
                ChunkType::Img => result.images.push(chunk.content),
                ChunkType::Err => result.errors.push(chunk.content),
            }
        }
        result
    }
}

/// Which interpreter a piece of code should run under.
#[derive(Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// The stateful interactive interpreter (variables persist across calls).
    #[default]
    Interp,
    /// A one-shot subshell, run with the interpreter's current working
    /// directory.
    Shell,
}

/// Body of `POST /exec`.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ExecRequest {
    pub code: String,
    #[serde(default)]
    pub kernel: Kernel,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Describes a file living in a session's working directory.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RemoteFile {
    /// Path relative to the session's working directory.
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl RemoteFile {
    /// The file's base name, independent of its directory prefix.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Body of the deprecated `POST /code/execute` request.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct LegacyExecuteRequest {
    pub properties: LegacyExecuteProperties,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct LegacyExecuteProperties {
    pub code: String,
}

/// Body of the deprecated `POST /code/execute` response.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct LegacyExecuteResult {
    pub properties: LegacyExecuteResultProperties,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct LegacyExecuteResultProperties {
    pub stdout: String,
    pub stderr: String,
    pub result: String,
}

impl From<ExecResult> for LegacyExecuteResult {
    fn from(r: ExecResult) -> Self {
        LegacyExecuteResult {
            properties: LegacyExecuteResultProperties {
                stdout: r.text,
                stderr: r.errors.join("\n"),
                result: String::new(),
            },
        }
    }
}

/// Response body of `GET /`.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct HealthReply {
    pub status: String,
}

impl Default for HealthReply {
    fn default() -> Self {
        HealthReply { status: "ok".to_string() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chunk_type_tags_round_trip() {
        for kind in [ChunkType::Txt, ChunkType::Img, ChunkType::Err] {
            let tagged = format!("<{t}>hello</{t}>", t = kind.tag());
            assert!(tagged.starts_with(&format!("<{}>", kind)));
        }
    }

    #[test]
    fn exec_result_splits_by_type() {
        let chunks = vec![
            ExecChunk::txt("hello "),
            ExecChunk::txt("world"),
            ExecChunk::img("aGVsbG8="),
            ExecChunk::err("boom"),
        ];
        let result = ExecResult::from_chunks(chunks);
        assert_eq!(result.text, "hello world");
        assert_eq!(result.images, vec!["aGVsbG8=".to_string()]);
        assert_eq!(result.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn legacy_execute_result_maps_text_and_errors() {
        let exec_result = ExecResult {
            text: "1".to_string(),
            images: vec![],
            errors: vec!["NameError: x".to_string()],
        };
        let legacy: LegacyExecuteResult = exec_result.into();
        assert_eq!(legacy.properties.stdout, "1");
        assert_eq!(legacy.properties.stderr, "NameError: x");
    }
}
