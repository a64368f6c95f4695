use smallvec::SmallVec;

use super::diagnostics::Diagnostics;
use super::OptimizeError;
use crate::graph::{EdgeId, Graph, NodeId, OpAttrs, OpType, PoolMethod, IDENTITY_STRIDE};

/// Window of a pooling operator which reads a single element.
const POINTWISE_WINDOW: [usize; 4] = [1, 1, 1, 1];

/// Materialize the pending stride of `consumer` as a point-wise average
/// pooling operator placed between `op` and `consumer`.
///
/// The existing connection from an output of `op` into `consumer` is
/// replaced by `output -> pooling -> pooling_output -> consumer`. The edge
/// into `consumer` keeps the attributes of the edge it replaces. The new
/// pooling operator is marked stale so that its output shape gets inferred.
///
/// Exactly one edge must connect the outputs of `op` to `consumer`, otherwise
/// [`OptimizeError::AmbiguousEdge`] is returned and the graph is not
/// modified.
///
/// Returns the ID of the new pooling operator.
pub fn insert_pooling(
    graph: &mut Graph,
    op: NodeId,
    consumer: NodeId,
    diag: &Diagnostics,
) -> Result<NodeId, OptimizeError> {
    let edges: SmallVec<[EdgeId; 2]> = graph
        .op_outputs(op)
        .into_iter()
        .flat_map(|output| graph.edges_between(output, consumer))
        .collect();

    let ambiguous_edge = |graph: &Graph| OptimizeError::AmbiguousEdge {
        from: graph.node_name(op),
        to: graph.node_name(consumer),
        count: edges.len(),
    };
    let [edge_id] = edges[..] else {
        return Err(ambiguous_edge(graph));
    };
    let edge = graph
        .remove_edge(edge_id)
        .ok_or_else(|| ambiguous_edge(graph))?;

    let stride = graph
        .get_op(consumer)
        .and_then(|c| c.attrs().stride_prop)
        .unwrap_or(IDENTITY_STRIDE);
    let mut attrs = OpAttrs::pooling(POINTWISE_WINDOW, stride, PoolMethod::Avg);
    attrs.mark_stale();

    let name = graph.unique_name("Pooling_");
    let (pool_id, pool_output) = graph.add_simple_op(&name, OpType::Pooling, attrs, &[edge.src()]);
    graph.add_edge(pool_output, consumer, *edge.attrs());
    if let Some(data) = graph.get_data_mut(pool_output) {
        data.clear_fw_tensor_attrs();
    }

    diag.info(
        graph,
        pool_id,
        format_args!(
            "Inserted pooling with stride {:?} between {} and {}",
            stride,
            graph.node_name(op),
            graph.node_name(consumer)
        ),
    );

    Ok(pool_id)
}

#[cfg(test)]
mod tests {
    use super::insert_pooling;
    use crate::graph::{EdgeAttrs, Graph, OpAttrs, OpType, PoolMethod};
    use crate::optimize::diagnostics::Diagnostics;
    use crate::optimize::OptimizeError;

    #[test]
    fn test_insert_pooling() {
        let mut graph = Graph::with_layout("NCHW");
        let (relu, relu_out) = graph.add_simple_op("relu", OpType::ReLU, OpAttrs::default(), &[]);
        graph
            .get_data_mut(relu_out)
            .unwrap()
            .set_fw_tensor_debug_info("relu:0");
        let consumer = graph.add_op(
            "add",
            OpType::Eltwise,
            OpAttrs {
                stride_prop: Some([1, 1, 2, 2]),
                ..Default::default()
            },
        );
        graph.add_edge(relu_out, consumer, EdgeAttrs::input(1));

        let pool = insert_pooling(&mut graph, relu, consumer, &Diagnostics::new()).unwrap();

        let pool_op = graph.get_op(pool).unwrap();
        assert_eq!(pool_op.op_type(), &OpType::Pooling);
        assert!(pool_op.name().starts_with("Pooling_"));
        let attrs = pool_op.attrs();
        assert_eq!(attrs.window, Some([1, 1, 1, 1]));
        assert_eq!(attrs.stride, Some([1, 1, 2, 2]));
        assert_eq!(attrs.pad, Some([[0, 0]; 4]));
        assert_eq!(attrs.pool_method, Some(PoolMethod::Avg));
        assert!(attrs.is_stale());

        assert!(graph.edges_between(relu_out, consumer).is_empty());
        assert_eq!(graph.op_inputs(pool).as_slice(), &[relu_out]);

        let pool_out = graph.op_outputs(pool)[0];
        let new_edges = graph.edges_between(pool_out, consumer);
        assert_eq!(new_edges.len(), 1);
        let new_edge = graph.edge(new_edges[0]).unwrap();
        assert_eq!(new_edge.attrs(), &EdgeAttrs::input(1));
        assert_eq!(graph.get_data(pool_out).unwrap().fw_tensor_debug_info(), None);

        // Debug info of the producer's output is untouched.
        assert_eq!(
            graph.get_data(relu_out).unwrap().fw_tensor_debug_info(),
            Some("relu:0")
        );
    }

    #[test]
    fn test_insert_pooling_ambiguous_edge() {
        let mut graph = Graph::with_layout("NCHW");
        let (relu, relu_out) = graph.add_simple_op("relu", OpType::ReLU, OpAttrs::default(), &[]);
        let (add, _) = graph.add_simple_op(
            "add",
            OpType::Eltwise,
            OpAttrs::default(),
            &[relu_out, relu_out],
        );
        let edge_count = graph.edge_count();

        let result = insert_pooling(&mut graph, relu, add, &Diagnostics::new());

        assert_eq!(
            result,
            Err(OptimizeError::AmbiguousEdge {
                from: "relu".into(),
                to: "add".into(),
                count: 2,
            })
        );
        assert_eq!(graph.edge_count(), edge_count);
    }
}
