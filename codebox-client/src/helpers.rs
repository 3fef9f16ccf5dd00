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

//! Higher-level operations expressed as scripted `exec` calls, per
//! SPEC_FULL.md §4.6. None of these need a dedicated wire message: they
//! are plain code run through the same `exec` path every other call uses.

use std::time::Duration;

use codebox_protocol::Kernel;

use crate::{
    engine::{exec_collect, Engine},
    error::Result,
};

pub async fn install(engine: &dyn Engine, packages: &[&str]) -> Result<()> {
    let code = format!("uv pip install {}", packages.join(" "));
    exec_collect(engine, &code, Kernel::Shell, None, None).await?;
    Ok(())
}

pub async fn list_packages(engine: &dyn Engine) -> Result<Vec<String>> {
    let result = exec_collect(
        engine,
        "uv pip list | tail -n +3 | cut -d ' ' -f 1",
        Kernel::Shell,
        None,
        None,
    )
    .await?;
    Ok(result.text.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
}

/// One entry from [`list_files`]: a path relative to the working
/// directory and its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSizeEntry {
    pub path: String,
    pub bytes: u64,
}

pub async fn list_files(engine: &dyn Engine) -> Result<Vec<FileSizeEntry>> {
    let result = exec_collect(
        engine,
        "find . -type f -exec du -h {} + | awk '{print $2, $1}' | sort",
        Kernel::Shell,
        None,
        None,
    )
    .await?;
    Ok(result.text.lines().filter_map(parse_size_line).collect())
}

fn parse_size_line(line: &str) -> Option<FileSizeEntry> {
    let (path, size) = line.rsplit_once(' ')?;
    Some(FileSizeEntry { path: path.to_string(), bytes: parse_du_size(size)? })
}

fn parse_du_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (number, suffix) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&raw[..raw.len() - 1], Some(c.to_ascii_uppercase())),
        _ => (raw, None),
    };
    let value: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        None => 1.0,
        Some('K') => 1024.0,
        Some('M') => 1024.0 * 1024.0,
        Some('G') => 1024.0 * 1024.0 * 1024.0,
        Some('T') => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        Some(_) => return None,
    };
    Some((value * multiplier) as u64)
}

pub async fn show_variables(engine: &dyn Engine) -> Result<String> {
    let code = "for _cb_v in dir():\n    if not _cb_v.startswith('_'):\n        print(eval(_cb_v), end='')\n";
    let result = exec_collect(engine, code, Kernel::Interp, None, None).await?;
    Ok(result.text)
}

pub async fn healthcheck(engine: &dyn Engine) -> Result<bool> {
    let result = exec_collect(engine, "echo ok", Kernel::Shell, None, None).await?;
    Ok(result.text.contains("ok"))
}

/// Spawns a background task that calls [`healthcheck`] once a minute, for
/// `minutes` iterations, keeping an idle-timeout engine from shutting
/// down. The returned handle can be dropped or aborted to stop early.
pub fn keep_alive(engine: std::sync::Arc<dyn Engine>, minutes: u32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for _ in 0..minutes {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = healthcheck(engine.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_du_size("512"), Some(512));
    }

    #[test]
    fn parses_kilobyte_suffix() {
        assert_eq!(parse_du_size("4.0K"), Some(4096));
    }

    #[test]
    fn parses_megabyte_and_gigabyte_suffixes() {
        assert_eq!(parse_du_size("2.5M"), Some((2.5 * 1024.0 * 1024.0) as u64));
        assert_eq!(parse_du_size("1G"), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert_eq!(parse_du_size("3X"), None);
    }

    #[test]
    fn parses_full_listing_line() {
        let entry = parse_size_line("./data/t.txt 4.0K").unwrap();
        assert_eq!(entry.path, "./data/t.txt");
        assert_eq!(entry.bytes, 4096);
    }
}
