//! rten-opt implements optimization passes over neural network model graphs.
//!
//! # Graphs
//!
//! A [`Graph`] is a directed multigraph in which operator nodes alternate with
//! data (tensor) nodes. Operators carry an [`OpType`] and a record of optional
//! attributes ([`OpAttrs`]). Data nodes carry an optional shape. The graph
//! also records the layout of its activations (`NCHW` or `NHWC`), which
//! determines which tensor axes are spatial.
//!
//! Graphs are populated by a model importer, optimized, and then handed on to
//! a runtime. Use [`Graph::to_dot`] to inspect a graph with Graphviz.
//!
//! # Optimizations
//!
//! [`GraphOptimizer`] applies passes to a graph:
//!
//! - **Stride propagation** moves the stride of convolutions upstream through
//!   spatially point-wise operators such as `ReLU` and `Eltwise`, so that
//!   earlier operators run on subsampled tensors. Where a stride cannot be
//!   moved, an average pooling operator with a 1x1 window is inserted to
//!   apply it.
//!
//! Operators modified by a pass have their output shapes recomputed using an
//! [`InferShapes`] implementation. [`ShapeInference`] is used by default.
//!
//! ```
//! use rten_opt::{EdgeAttrs, Graph, GraphOptimizer, OpAttrs, OpType, OptimizeOptions};
//!
//! let mut graph = Graph::with_layout("NCHW");
//! let input = graph.add_op("input", OpType::from_name("Parameter"), OpAttrs::default());
//! let x = graph.add_data("x", Some(vec![1, 16, 32, 32]));
//! graph.add_edge(input, x, EdgeAttrs::output(0));
//!
//! let conv_attrs = OpAttrs::convolution([1, 1], [1, 1, 1, 1]);
//! let (_, x) = graph.add_simple_op("conv_1", OpType::Convolution, conv_attrs, &[x]);
//! let (_, x) = graph.add_simple_op("relu", OpType::ReLU, OpAttrs::default(), &[x]);
//! let conv_attrs = OpAttrs::convolution([1, 1], [1, 1, 2, 2]);
//! let (conv_2, _) = graph.add_simple_op("conv_2", OpType::Convolution, conv_attrs, &[x]);
//!
//! let graph = GraphOptimizer::new()
//!     .optimize(graph, &OptimizeOptions::default())
//!     .unwrap();
//!
//! // The stride of `conv_2` has moved to `conv_1`.
//! assert_eq!(graph.get_op(conv_2).unwrap().attrs().stride, Some([1, 1, 1, 1]));
//! ```
//!
//! # Logging
//!
//! The optimizer reports what it did via the [`log`](https://docs.rs/log)
//! crate, using the target [`optimize::LOG_TARGET`]. The verbosity of these
//! reports is set by [`OptimizeOptions::diagnostics`].

mod env;
mod graph;
mod infer_shapes;

pub mod optimize;

pub use graph::traversal;
pub use graph::{
    DataNode, Edge, EdgeAttrs, EdgeId, Graph, GraphError, Layout, Node, NodeId, OpAttrs, OpType,
    OperatorNode, PoolMethod, Stride, IDENTITY_STRIDE,
};
pub use infer_shapes::{InferShapes, ShapeInference, ShapeInferenceError};
pub use optimize::{DiagnosticLevel, GraphOptimizer, OptimizeError, OptimizeOptions};
