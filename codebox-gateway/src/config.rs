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

use std::{path::PathBuf, time::Duration};

/// Configuration read once at process start from the environment. There is
/// deliberately no file-based config layer here (see SPEC_FULL.md §10.3).
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// `None` means the idle-shutdown loop is disabled (`CODEBOX_TIMEOUT=none`).
    pub idle_timeout: Option<Duration>,
    pub working_dir_root: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = std::env::var("CODEBOX_PORT")
            .ok()
            .map(|v| v.parse::<u16>())
            .transpose()?
            .unwrap_or(8080);

        let idle_timeout = match std::env::var("CODEBOX_TIMEOUT") {
            Ok(v) if v.eq_ignore_ascii_case("none") => None,
            Ok(v) => Some(Duration::from_secs(v.parse::<u64>()? * 60)),
            Err(_) => Some(Duration::from_secs(15 * 60)),
        };

        let working_dir_root = std::env::var("CODEBOX_WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".codebox"));

        Ok(Config { port, idle_timeout, working_dir_root })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeout_none_disables_idle_shutdown() {
        std::env::set_var("CODEBOX_TIMEOUT", "none");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.idle_timeout, None);
        std::env::remove_var("CODEBOX_TIMEOUT");
    }

    #[test]
    fn timeout_defaults_to_fifteen_minutes() {
        std::env::remove_var("CODEBOX_TIMEOUT");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(15 * 60)));
    }

    #[test]
    fn timeout_parses_minutes() {
        std::env::set_var("CODEBOX_TIMEOUT", "3");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(180)));
        std::env::remove_var("CODEBOX_TIMEOUT");
    }
}
