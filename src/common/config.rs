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
//! Engine configuration loaded from TOML.
//!
//! Responsibilities:
//! - Loads `KestrelConfig` once from `$KESTREL_CONFIG` or `./kestrel.toml`.
//! - Provides typed accessors with defaults for callers that run without a
//!   config file (tests, embedded use).
//!
//! Key exported interfaces:
//! - Types: `KestrelConfig`.
//! - Functions: `config`, `preferred_output_batch_size`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

static CONFIG: OnceLock<KestrelConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

fn default_preferred_output_batch_size() -> usize {
    1024
}

#[derive(Clone, Deserialize)]
pub struct KestrelConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub exec: ExecConfig,
}

#[derive(Clone, Deserialize)]
pub struct ExecConfig {
    /// Target number of rows per operator output batch.
    #[serde(default = "default_preferred_output_batch_size")]
    pub preferred_output_batch_size: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            preferred_output_batch_size: default_preferred_output_batch_size(),
        }
    }
}

impl KestrelConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: KestrelConfig = toml::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(cfg)
    }
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static KestrelConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = KestrelConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static KestrelConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = KestrelConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static KestrelConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("KESTREL_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("kestrel.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $KESTREL_CONFIG or create ./kestrel.toml"
    ))
}

pub(crate) fn preferred_output_batch_size() -> usize {
    config()
        .ok()
        .map(|c| c.exec.preferred_output_batch_size)
        .unwrap_or_else(default_preferred_output_batch_size)
        .max(1)
}
