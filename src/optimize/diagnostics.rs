use std::cell::RefCell;
use std::fmt;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

/// Log target used for optimizer diagnostics.
pub const LOG_TARGET: &str = "rten_opt::optimize";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't show any diagnostics.
    #[default]
    Off,
    /// Report only unsuccessful optimizations.
    Warn,
    /// Report all optimizations.
    Info,
}

impl DiagnosticLevel {
    /// Parse a level name such as "warn". Returns `None` if the name is not
    /// recognized.
    pub fn parse(name: &str) -> Option<DiagnosticLevel> {
        match name.to_ascii_lowercase().as_str() {
            "off" | "0" => Some(DiagnosticLevel::Off),
            "warn" => Some(DiagnosticLevel::Warn),
            "info" => Some(DiagnosticLevel::Info),
            _ => None,
        }
    }
}

/// Diagnostic reporter for graph optimizations.
///
/// Messages are emitted through the `log` facade with target [`LOG_TARGET`].
/// The diagnostic level raises the severity of messages at or below it, so
/// with the level `Off` all messages are still visible at `log::debug!`.
pub struct Diagnostics {
    /// Nodes against which diagnostics have been reported at the `Warn` level
    /// or higher.
    warned_nodes: RefCell<FxHashSet<NodeId>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            warned_nodes: RefCell::new(FxHashSet::default()),
            level: DiagnosticLevel::Off,
        }
    }

    /// Enable reporting of all messages at or above a given level.
    pub fn set_level(&mut self, level: DiagnosticLevel) {
        self.level = level;
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        self.level >= level
    }

    /// Log a diagnostic message for a given node at the [`Info`](DiagnosticLevel::Info) level.
    ///
    /// The message is logged with `log::info!` if this level is enabled and
    /// with `log::debug!` otherwise.
    pub fn info(&self, graph: &Graph, node: NodeId, message: fmt::Arguments<'_>) {
        let level = if self.enabled(DiagnosticLevel::Info) {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        log::log!(target: LOG_TARGET, level, "{}: {}", graph.node_name(node), message);
    }

    /// Log a diagnostic message for a given node at the [`Warn`](DiagnosticLevel::Warn) level.
    ///
    /// If this level is enabled, the first warning for each node is logged
    /// with `log::warn!` and later ones are dropped. Otherwise every message
    /// is logged with `log::debug!`.
    pub fn warn(&self, graph: &Graph, node: NodeId, message: fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Warn) {
            log::debug!(target: LOG_TARGET, "{}: {}", graph.node_name(node), message);
            return;
        }
        if !self.warned_nodes.borrow_mut().insert(node) {
            return;
        }
        log::warn!(target: LOG_TARGET, "{}: {}", graph.node_name(node), message);
    }

    /// Return the number of distinct nodes that have been warned about.
    pub fn warned_count(&self) -> usize {
        self.warned_nodes.borrow().len()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
