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
//! Engine logging setup.
//!
//! Operators log structured key=value lines (see the probe's finish stats)
//! through `tracing`; this module wires the global subscriber once. The
//! filter comes from [`KestrelConfig`](crate::common::config::KestrelConfig):
//! `log_filter` is a full EnvFilter expression and takes precedence over the
//! plain `log_level`.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::common::config;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber with an explicit EnvFilter expression,
/// e.g. `"kestrel=debug"`. Later calls are no-ops.
pub fn init_with_filter(filter: &str) {
    INIT.get_or_init(|| {
        // ANSI escapes turn into garbage when stderr is redirected to a file.
        let use_ansi = atty::is(atty::Stream::Stderr);
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .with_target(true)
            .with_thread_ids(true)
            .try_init();
    });
}

/// Installs the global subscriber from the loaded config, defaulting to
/// `info` when no config file is present.
pub fn init() {
    let filter = config::config()
        .ok()
        .map(|c| {
            c.log_filter
                .clone()
                .unwrap_or_else(|| c.log_level.clone())
        })
        .unwrap_or_else(|| "info".to_string());
    init_with_filter(&filter);
}

pub use tracing::instrument;
pub use tracing::{debug, error, info, trace, warn};
