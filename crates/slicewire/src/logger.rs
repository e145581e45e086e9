// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Warning sink for life-cycle hook failures.
//!
//! Protocol errors are returned to the caller. The only failures the engine
//! swallows are the ones raised by user hooks; they are reported here so the
//! identity maps stay consistent for the rest of the graph.

use std::sync::Arc;

/// Destination for warnings raised while marshaling.
pub trait Logger: Send + Sync {
    /// Report a warning.
    fn warning(&self, message: &str);
}

/// Forwards warnings to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl Logger for LogCrateLogger {
    fn warning(&self, message: &str) {
        log::warn!("[slicewire] {}", message);
    }
}

/// Default logger shared by streams that do not install their own.
pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(LogCrateLogger)
}
