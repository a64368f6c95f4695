use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::env::{env_flag, env_str};
use crate::graph::{Graph, GraphError};
use crate::infer_shapes::{InferShapes, ShapeInference, ShapeInferenceError};

mod diagnostics;
mod dispatch;
mod insert_pooling;
mod stride_prop;


pub use diagnostics::{DiagnosticLevel, Diagnostics, LOG_TARGET};
pub use dispatch::{dispatch, DefaultAttrs, DispatchEntry, PropagationHandler};
pub use insert_pooling::insert_pooling;
pub use stride_prop::stride_optimization;

/// Errors that occur while applying graph optimizations.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizeError {
    /// A rewrite required a single edge between two operators, but found
    /// `count` edges.
    AmbiguousEdge {
        from: String,
        to: String,
        count: usize,
    },

    /// Shape inference failed for an operator modified by the optimizer.
    InferenceFailed {
        node: String,
        error: ShapeInferenceError,
    },

    /// The optimized graph failed validation.
    InvalidGraph(GraphError),
}

impl Display for OptimizeError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::AmbiguousEdge { from, to, count } => write!(
                f,
                "expected one edge from \"{}\" to \"{}\" but found {}",
                from, to, count
            ),
            Self::InferenceFailed { node, error } => {
                write!(f, "shape inference failed for \"{}\": {}", node, error)
            }
            Self::InvalidGraph(err) => write!(f, "optimized graph is invalid: {}", err),
        }
    }
}

impl Error for OptimizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AmbiguousEdge { .. } => None,
            Self::InferenceFailed { error, .. } => Some(error),
            Self::InvalidGraph(err) => Some(err),
        }
    }
}

/// Configuration for [`GraphOptimizer::optimize`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizeOptions {
    /// Move convolution strides upstream through point-wise operators.
    pub stride_optimization: bool,

    /// Level of diagnostic messages to log about applied optimizations.
    pub diagnostics: DiagnosticLevel,

    /// Check structural invariants of the graph after optimization.
    pub validate: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            stride_optimization: true,
            diagnostics: DiagnosticLevel::Off,
            validate: false,
        }
    }
}

impl OptimizeOptions {
    /// Create options from the defaults, overridden by environment
    /// variables.
    ///
    /// - `RTEN_OPT_STRIDE` - Enable or disable stride optimization
    /// - `RTEN_OPT_VALIDATE` - Validate the graph after optimization
    /// - `RTEN_OPT_DIAGNOSTICS` - Diagnostic level ("off", "warn" or "info")
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let diagnostics = match env_str("RTEN_OPT_DIAGNOSTICS") {
            Some(level) => DiagnosticLevel::parse(&level).unwrap_or_else(|| {
                log::warn!("Unrecognized diagnostic level \"{}\"", level);
                defaults.diagnostics
            }),
            None => defaults.diagnostics,
        };

        OptimizeOptions {
            stride_optimization: env_flag("RTEN_OPT_STRIDE", defaults.stride_optimization),
            diagnostics,
            validate: env_flag("RTEN_OPT_VALIDATE", defaults.validate),
        }
    }
}

/// Applies optimizations to a [`Graph`] to enable faster inference.
pub struct GraphOptimizer {
    infer: Box<dyn InferShapes>,
}

impl GraphOptimizer {
    /// Create a new optimizer which uses the built-in [`ShapeInference`] to
    /// update shapes of modified operators.
    pub fn new() -> Self {
        Self::with_shape_inference(ShapeInference::new())
    }

    /// Create an optimizer which uses `infer` to update shapes of modified
    /// operators.
    pub fn with_shape_inference(infer: impl InferShapes + 'static) -> Self {
        GraphOptimizer {
            infer: Box::new(infer),
        }
    }

    /// Apply optimizations to a graph.
    ///
    /// Operators may be modified and new operators inserted. Existing
    /// operators are never removed.
    ///
    /// Returns the optimized graph.
    pub fn optimize(
        &self,
        mut graph: Graph,
        options: &OptimizeOptions,
    ) -> Result<Graph, OptimizeError> {
        let mut diag = Diagnostics::new();
        diag.set_level(options.diagnostics);

        if options.stride_optimization {
            stride_optimization(&mut graph, self.infer.as_ref(), &diag)?;
        }

        if options.validate {
            graph.validate().map_err(OptimizeError::InvalidGraph)?;
        }

        Ok(graph)
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
