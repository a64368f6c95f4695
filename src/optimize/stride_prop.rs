//! Stride propagation.
//!
//! A strided convolution subsamples its output. When the operators between
//! two convolutions are spatially point-wise, the subsampling can be moved
//! upstream so that earlier operators process smaller tensors. This pass
//! computes, for each operator, the downstream stride that can be absorbed
//! above it (`stride_prop`), folds agreed strides into upstream convolutions,
//! and inserts point-wise pooling where a stride cannot be moved further.

use smallvec::SmallVec;

use super::diagnostics::{Diagnostics, LOG_TARGET};
use super::dispatch::{dispatch, PropagationHandler};
use super::insert_pooling::insert_pooling;
use super::OptimizeError;
use crate::graph::traversal::{next_operations, pseudo_topological_sort};
use crate::graph::{Graph, Layout, NodeId, OpAttrs, Stride, IDENTITY_STRIDE};
use crate::infer_shapes::InferShapes;

type OpList = SmallVec<[NodeId; 4]>;

/// Run stride propagation over a graph and re-infer the shapes of every
/// operator it modified.
///
/// If the graph's layout is missing or not supported, a warning is logged
/// and the graph is left unchanged.
pub fn stride_optimization(
    graph: &mut Graph,
    infer: &dyn InferShapes,
    diag: &Diagnostics,
) -> Result<(), OptimizeError> {
    let Some(layout) = graph.layout().and_then(Layout::parse) else {
        log::warn!(
            target: LOG_TARGET,
            "Stride propagation: layout {} is not supported",
            graph.layout().unwrap_or("(none)")
        );
        return Ok(());
    };

    StridePropagation::new(layout, diag).run(graph)?;
    reinfer_stale_nodes(graph, infer, diag)
}

/// Re-infer shapes of every stale operator, in dependency order.
///
/// Each operator is marked as inferred once its shapes have been updated.
fn reinfer_stale_nodes(
    graph: &mut Graph,
    infer: &dyn InferShapes,
    diag: &Diagnostics,
) -> Result<(), OptimizeError> {
    let stale: Vec<NodeId> = pseudo_topological_sort(graph, false)
        .into_iter()
        .filter(|&id| graph.get_op(id).is_some_and(|op| op.attrs().is_stale()))
        .collect();

    for op in stale {
        diag.info(graph, op, format_args!("Re-inferring output shapes"));
        infer
            .infer_shapes(graph, op)
            .map_err(|error| OptimizeError::InferenceFailed {
                node: graph.node_name(op),
                error,
            })?;
        if let Some(node) = graph.get_op_mut(op) {
            node.attrs_mut().is_partial_inferred = Some(true);
        }
    }

    Ok(())
}

/// Return the `stride_prop` values of `ops` and whether they can be merged.
///
/// The values can be merged if every operator has a `stride_prop` and they
/// are all equal to the same non-identity stride. An empty list can
/// trivially be merged.
fn check_next_ops(graph: &Graph, ops: &[NodeId]) -> (SmallVec<[Stride; 4]>, bool) {
    let stride_props: SmallVec<[Stride; 4]> = ops
        .iter()
        .filter_map(|&id| graph.get_op(id).and_then(|op| op.attrs().stride_prop))
        .collect();

    let all_valid = stride_props.len() == ops.len()
        && stride_props
            .iter()
            .all(|sp| *sp == stride_props[0] && *sp != IDENTITY_STRIDE);

    (stride_props, all_valid)
}

/// Multiply two strides element-wise, saturating on overflow.
fn elementwise_mul(a: Stride, b: Stride) -> Stride {
    std::array::from_fn(|i| a[i].saturating_mul(b[i]))
}

struct StridePropagation<'a> {
    spatial_dims: [usize; 2],
    diag: &'a Diagnostics,
}

impl<'a> StridePropagation<'a> {
    fn new(layout: Layout, diag: &'a Diagnostics) -> Self {
        StridePropagation {
            spatial_dims: layout.spatial_dims(),
            diag,
        }
    }

    /// Visit all operators, consumers before producers.
    ///
    /// The visiting order is computed up front, so pooling operators inserted
    /// during the pass are not visited.
    fn run(&self, graph: &mut Graph) -> Result<(), OptimizeError> {
        let ops: Vec<NodeId> = pseudo_topological_sort(graph, true)
            .into_iter()
            .filter(|&id| graph.get_op(id).is_some())
            .collect();

        for op in ops {
            let Some(node) = graph.get_op_mut(op) else {
                continue;
            };
            match dispatch(node.op_type()) {
                Some(entry) => {
                    entry.defaults.apply(node.attrs_mut());
                    match entry.handler {
                        PropagationHandler::Generic => self.generic_stride_prop(graph, op, true)?,
                        PropagationHandler::Convolution => self.conv_stride_prop(graph, op)?,
                    }
                }
                None => self.generic_stride_prop(graph, op, false)?,
            }
        }

        Ok(())
    }

    /// Return true if `op` has a pending spatial stride that it cannot apply
    /// itself, so the stride must be materialized before it.
    fn needs_pooling(&self, attrs: &OpAttrs) -> bool {
        let Some(stride_prop) = attrs.stride_prop else {
            return false;
        };
        let spatial_stride = self.spatial_dims.map(|dim| stride_prop[dim]);
        spatial_stride != [1, 1] && !attrs.has_stride()
    }

    /// Insert pooling before each consumer in `next_ops` with a stride that
    /// could not be moved above `op`. Returns the number of pooling operators
    /// inserted.
    fn insert_pooling_before(
        &self,
        graph: &mut Graph,
        op: NodeId,
        next_ops: &[NodeId],
    ) -> Result<usize, OptimizeError> {
        let mut inserted = 0;
        for &next in next_ops {
            if graph
                .get_op(next)
                .is_some_and(|next_op| self.needs_pooling(next_op.attrs()))
            {
                insert_pooling(graph, op, next, self.diag)?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Reset the stride of consumers which can absorb a stride, now that the
    /// stride is applied above them.
    fn move_strides_upstream(&self, graph: &mut Graph, op: NodeId, next_ops: &[NodeId]) {
        for &next in next_ops {
            let Some(next_op) = graph.get_op_mut(next) else {
                continue;
            };
            let attrs = next_op.attrs_mut();
            if !attrs.has_stride() {
                continue;
            }
            attrs.stride = Some(IDENTITY_STRIDE);
            attrs.mark_stale();

            let op_type = next_op.op_type().clone();
            self.diag.info(
                graph,
                next,
                format_args!(
                    "{} strides were moved upstream via {}",
                    op_type,
                    graph.node_name(op)
                ),
            );
        }
    }

    /// Mark `op` for re-inference and drop the provenance of its outputs,
    /// which no longer match the source model.
    fn invalidate_outputs(&self, graph: &mut Graph, op: NodeId) {
        if let Some(node) = graph.get_op_mut(op) {
            node.attrs_mut().mark_stale();
        }
        for output in graph.op_outputs(op) {
            if let Some(data) = graph.get_data_mut(output) {
                data.clear_fw_tensor_attrs();
            }
        }
    }

    fn set_stride_prop(graph: &mut Graph, op: NodeId, stride_prop: Stride) {
        if let Some(node) = graph.get_op_mut(op) {
            node.attrs_mut().stride_prop = Some(stride_prop);
        }
    }

    /// Propagate strides through a spatially point-wise operator.
    ///
    /// If `supported` is false, the operator cannot pass strides through
    /// and any pending consumer strides are materialized as pooling.
    fn generic_stride_prop(
        &self,
        graph: &mut Graph,
        op: NodeId,
        supported: bool,
    ) -> Result<(), OptimizeError> {
        let next_ops: OpList = next_operations(graph, op);
        let (stride_props, all_valid) = check_next_ops(graph, &next_ops);

        if !supported || !all_valid {
            let inserted = self.insert_pooling_before(graph, op, &next_ops)?;
            if inserted > 0 {
                self.diag.warn(
                    graph,
                    op,
                    format_args!(
                        "Stride could not be propagated, inserted {} pooling operator(s)",
                        inserted
                    ),
                );
            }
            Self::set_stride_prop(graph, op, IDENTITY_STRIDE);
            return Ok(());
        }

        self.move_strides_upstream(graph, op, &next_ops);
        let stride_prop = stride_props.first().copied().unwrap_or(IDENTITY_STRIDE);
        Self::set_stride_prop(graph, op, stride_prop);
        self.invalidate_outputs(graph, op);

        Ok(())
    }

    /// Propagate strides into a convolution.
    ///
    /// An agreed downstream stride is multiplied into the convolution's own
    /// stride. Only a 1x1 convolution can pass its stride further upstream.
    fn conv_stride_prop(&self, graph: &mut Graph, op: NodeId) -> Result<(), OptimizeError> {
        let next_ops: OpList = next_operations(graph, op);
        let (stride_props, all_valid) = check_next_ops(graph, &next_ops);

        if !all_valid {
            let inserted = self.insert_pooling_before(graph, op, &next_ops)?;
            if inserted > 0 {
                self.diag.warn(
                    graph,
                    op,
                    format_args!(
                        "Stride could not be propagated, inserted {} pooling operator(s)",
                        inserted
                    ),
                );
            }
        } else if let Some(&agreed) = stride_props.first() {
            if let Some(node) = graph.get_op_mut(op) {
                let attrs = node.attrs_mut();
                let stride = elementwise_mul(attrs.stride.unwrap_or(IDENTITY_STRIDE), agreed);
                attrs.stride = Some(stride);
                self.diag
                    .info(graph, op, format_args!("Got new strides {:?}", stride));
            }
            self.move_strides_upstream(graph, op, &next_ops);
            self.invalidate_outputs(graph, op);
        }

        let Some(node) = graph.get_op(op) else {
            return Ok(());
        };
        let attrs = node.attrs();
        let stride_prop = if attrs.kernel_spatial == Some([1, 1]) {
            attrs.stride.unwrap_or(IDENTITY_STRIDE)
        } else {
            IDENTITY_STRIDE
        };
        Self::set_stride_prop(graph, op, stride_prop);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rten_testing::TestCases;

    use super::{check_next_ops, elementwise_mul};
    use crate::graph::{Graph, OpAttrs, OpType, Stride};

    #[test]
    fn test_check_next_ops() {
        #[derive(Debug)]
        struct Case {
            stride_props: Vec<Option<Stride>>,
            expected_count: usize,
            expected_valid: bool,
        }

        let cases = [
            // No consumers.
            Case {
                stride_props: vec![],
                expected_count: 0,
                expected_valid: true,
            },
            // Single consumer with a pending stride.
            Case {
                stride_props: vec![Some([1, 1, 2, 2])],
                expected_count: 1,
                expected_valid: true,
            },
            // Consumers agree.
            Case {
                stride_props: vec![Some([1, 1, 2, 2]), Some([1, 1, 2, 2])],
                expected_count: 2,
                expected_valid: true,
            },
            // Consumers disagree.
            Case {
                stride_props: vec![Some([1, 1, 2, 2]), Some([1, 1, 3, 3])],
                expected_count: 2,
                expected_valid: false,
            },
            // Only some consumers have a stride_prop.
            Case {
                stride_props: vec![Some([1, 1, 2, 2]), None],
                expected_count: 1,
                expected_valid: false,
            },
            // Identity values cannot be merged.
            Case {
                stride_props: vec![Some([1, 1, 1, 1])],
                expected_count: 1,
                expected_valid: false,
            },
            // No consumer has a stride_prop.
            Case {
                stride_props: vec![None],
                expected_count: 0,
                expected_valid: false,
            },
        ];

        cases.test_each(|case| {
            let mut graph = Graph::new();
            let ops: Vec<_> = case
                .stride_props
                .iter()
                .enumerate()
                .map(|(i, stride_prop)| {
                    let attrs = OpAttrs {
                        stride_prop: *stride_prop,
                        ..Default::default()
                    };
                    graph.add_op(&format!("op_{}", i), OpType::ReLU, attrs)
                })
                .collect();

            let (stride_props, all_valid) = check_next_ops(&graph, &ops);

            assert_eq!(stride_props.len(), case.expected_count);
            assert_eq!(all_valid, case.expected_valid);
        })
    }

    #[test]
    fn test_elementwise_mul() {
        assert_eq!(elementwise_mul([1, 1, 2, 3], [1, 1, 2, 2]), [1, 1, 4, 6]);
        assert_eq!(
            elementwise_mul([1, 1, usize::MAX, 2], [1, 1, 2, 3]),
            [1, 1, usize::MAX, 6]
        );
    }
}
