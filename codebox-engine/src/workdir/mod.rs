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

//! The Working-Dir Manager: owns a session's private storage root and
//! services upload/download/list.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use codebox_protocol::RemoteFile;
use tracing::instrument;

use crate::error::{EngineError, Result};

const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(WorkDir { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` against the working directory root, rejecting any
    /// path that would escape it (via `..` components or an absolute
    /// path). Does not require the path to already exist, since this is
    /// also used to validate upload destinations.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if Path::new(name).is_absolute() {
            return Err(EngineError::UploadRejected(format!(
                "path '{name}' must be relative to the working directory"
            )));
        }
        let mut resolved = self.root.clone();
        for component in Path::new(name).components() {
            use std::path::Component;
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(EngineError::UploadRejected(format!(
                        "path '{name}' escapes the working directory"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(EngineError::UploadRejected(format!(
                        "path '{name}' must be relative to the working directory"
                    )));
                }
            }
        }
        if let Ok(canonical_root) = self.root.canonicalize() {
            if let Some(parent) = resolved.parent() {
                if let Ok(canonical_parent) = parent.canonicalize() {
                    if !canonical_parent.starts_with(&canonical_root) {
                        return Err(EngineError::UploadRejected(format!(
                            "path '{name}' escapes the working directory"
                        )));
                    }
                }
            }
        }
        Ok(resolved)
    }

    #[instrument(skip(self, data))]
    pub fn upload(&self, name: &str, data: &[u8]) -> Result<RemoteFile> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(data)?;
        Ok(RemoteFile { path: name.to_string(), size: Some(data.len() as u64) })
    }

    #[instrument(skip(self))]
    pub fn download(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(EngineError::FileNotFound(name.to_string()));
        }
        let mut file = fs::File::open(&path)?;
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(buf)
    }

    /// Enumerate every regular file under the working directory,
    /// recursively, with paths reported relative to the root.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        self.walk(&self.root, &mut files)?;
        Ok(files)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<RemoteFile>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                let size = entry.metadata().ok().map(|m| m.len());
                out.push(RemoteFile { path: relative, size });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn workdir() -> (tempfile::TempDir, WorkDir) {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkDir::new(dir.path().to_path_buf()).unwrap();
        (dir, wd)
    }

    #[test]
    fn upload_then_download_round_trips_bytes() {
        let (_dir, wd) = workdir();
        wd.upload("t.txt", b"Hello World!").unwrap();
        let content = wd.download("t.txt").unwrap();
        assert_eq!(content, b"Hello World!");
    }

    #[test]
    fn download_missing_file_is_file_not_found() {
        let (_dir, wd) = workdir();
        let err = wd.download("nope.txt").unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
    }

    #[test]
    fn upload_rejects_parent_dir_escape() {
        let (_dir, wd) = workdir();
        let err = wd.upload("../escape.txt", b"x").unwrap_err();
        assert!(matches!(err, EngineError::UploadRejected(_)));
    }

    #[test]
    fn upload_rejects_absolute_path() {
        let (_dir, wd) = workdir();
        let err = wd.upload("/etc/passwd", b"x").unwrap_err();
        assert!(matches!(err, EngineError::UploadRejected(_)));
    }

    #[test]
    fn list_finds_nested_files() {
        let (_dir, wd) = workdir();
        wd.upload("a.txt", b"a").unwrap();
        wd.upload("sub/b.txt", b"b").unwrap();
        let mut names: Vec<_> = wd.list().unwrap().into_iter().map(|f| f.path).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }
}
