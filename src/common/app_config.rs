// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<PyriteConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static PyriteConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = PyriteConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static PyriteConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = PyriteConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static PyriteConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("PYRITE_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("pyrite.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $PYRITE_CONFIG or create ./pyrite.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct PyriteConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "pyrite=debug,h2=off,hyper=off"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl PyriteConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: PyriteConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for PyriteConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_exchange_buffer_capacity_bytes")]
    pub exchange_buffer_capacity_bytes: usize,
    #[serde(default = "default_exchange_fetch_retry_max")]
    pub exchange_fetch_retry_max: u32,
    #[serde(default = "default_exchange_fetch_retry_backoff_ms")]
    pub exchange_fetch_retry_backoff_ms: u64,
    #[serde(default = "default_data_runtime_worker_threads")]
    pub data_runtime_worker_threads: usize,
    #[serde(default = "default_data_runtime_max_blocking_threads")]
    pub data_runtime_max_blocking_threads: usize,
}

fn default_exchange_buffer_capacity_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_exchange_fetch_retry_max() -> u32 {
    3
}

fn default_exchange_fetch_retry_backoff_ms() -> u64 {
    100
}

fn default_data_runtime_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_data_runtime_max_blocking_threads() -> usize {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchange_buffer_capacity_bytes: default_exchange_buffer_capacity_bytes(),
            exchange_fetch_retry_max: default_exchange_fetch_retry_max(),
            exchange_fetch_retry_backoff_ms: default_exchange_fetch_retry_backoff_ms(),
            data_runtime_worker_threads: default_data_runtime_worker_threads(),
            data_runtime_max_blocking_threads: default_data_runtime_max_blocking_threads(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PyriteConfig;
    use std::io::Write;

    #[test]
    fn parse_minimal_config() {
        let cfg: PyriteConfig = toml::from_str("").expect("parse empty config");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.runtime.exchange_buffer_capacity_bytes, 32 * 1024 * 1024);
        assert_eq!(cfg.runtime.exchange_fetch_retry_max, 3);
    }

    #[test]
    fn load_overrides_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp config");
        writeln!(
            file,
            "log_level = \"debug\"\n\n[runtime]\nexchange_buffer_capacity_bytes = 1024\nexchange_fetch_retry_max = 1"
        )
        .expect("write temp config");
        let cfg = PyriteConfig::load_from_file(file.path()).expect("load config");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.runtime.exchange_buffer_capacity_bytes, 1024);
        assert_eq!(cfg.runtime.exchange_fetch_retry_max, 1);
        assert_eq!(cfg.runtime.exchange_fetch_retry_backoff_ms, 100);
    }
}
