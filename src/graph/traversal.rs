//! Ordering and search utilities over a [`Graph`].
//!
//! Searches operate on operator nodes and step over the data nodes between
//! them, so callers can reason about "the next operator" without handling
//! the tensor nodes in between.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::{Graph, Node, NodeId, OpType};

/// Return an ordering of all nodes in the graph in which, for graphs without
/// cycles, every node comes after the nodes it depends on.
///
/// Graphs can contain cycles introduced by control-flow constructs. Edges
/// that close a cycle are ignored for ordering purposes, so the result is a
/// best-effort order rather than a proof that the graph is acyclic. Nodes
/// which are only reachable via a cycle are still included.
///
/// If `reverse` is true, the order is reversed so that consumers come before
/// their producers.
pub fn pseudo_topological_sort(graph: &Graph, reverse: bool) -> Vec<NodeId> {
    let successors: Vec<SmallVec<[NodeId; 4]>> =
        graph.iter().map(|(id, _)| graph.consumers(id)).collect();

    let sources = graph
        .iter()
        .filter(|(id, _)| graph.in_edges(*id).next().is_none())
        .map(|(id, _)| id);
    let roots = sources.chain(graph.iter().map(|(id, _)| id));

    let mut visited = vec![false; graph.len()];
    let mut post_order = Vec::with_capacity(graph.len());

    // Depth first traversal using an explicit stack of `(node, next_child)`
    // entries. A node is marked visited when pushed, so an edge back to a node
    // that is still on the stack is skipped.
    let mut stack: Vec<(NodeId, usize)> = Vec::new();
    for root in roots {
        if visited[root.as_usize()] {
            continue;
        }
        visited[root.as_usize()] = true;
        stack.push((root, 0));

        while let Some((node, next_child)) = stack.last_mut() {
            let children = &successors[node.as_usize()];
            if let Some(&child) = children.get(*next_child) {
                *next_child += 1;
                if !visited[child.as_usize()] {
                    visited[child.as_usize()] = true;
                    stack.push((child, 0));
                }
            } else {
                post_order.push(*node);
                stack.pop();
            }
        }
    }

    if !reverse {
        post_order.reverse();
    }
    post_order
}

#[derive(Copy, Clone, PartialEq)]
enum Direction {
    Forward,
    Backward,
}

fn neighbors(graph: &Graph, node: NodeId, direction: Direction) -> SmallVec<[NodeId; 4]> {
    match direction {
        Direction::Forward => graph.consumers(node),
        Direction::Backward => match graph.get_node(node) {
            Some(Node::Operator(_)) => graph.op_inputs(node),
            _ => {
                let mut producers = SmallVec::new();
                for (_, edge) in graph.in_edges(node) {
                    if !producers.contains(&edge.src()) {
                        producers.push(edge.src());
                    }
                }
                producers
            }
        },
    }
}

/// Collect the operators adjacent to `op` in a given direction, stepping
/// over any data nodes in between.
fn adjacent_operations(graph: &Graph, op: NodeId, direction: Direction) -> SmallVec<[NodeId; 4]> {
    let mut ops = SmallVec::new();
    let mut worklist: SmallVec<[NodeId; 8]> = neighbors(graph, op, direction).into_iter().collect();
    let mut cursor = 0;

    while let Some(&node) = worklist.get(cursor) {
        cursor += 1;
        match graph.get_node(node) {
            Some(Node::Operator(_)) => {
                if !ops.contains(&node) {
                    ops.push(node);
                }
            }
            Some(Node::Data(_)) => {
                for next in neighbors(graph, node, direction) {
                    if !worklist.contains(&next) {
                        worklist.push(next);
                    }
                }
            }
            None => {}
        }
    }

    ops
}

/// Return the operators which consume the outputs of `op`.
///
/// Each operator appears once, even if it consumes several outputs of `op`
/// or the same output on several ports. Returns an empty list if no operator
/// consumes the outputs.
pub fn next_operations(graph: &Graph, op: NodeId) -> SmallVec<[NodeId; 4]> {
    adjacent_operations(graph, op, Direction::Forward)
}

/// Return the operators which produce the inputs of `op`, ordered by input
/// port.
pub fn prev_operations(graph: &Graph, op: NodeId) -> SmallVec<[NodeId; 4]> {
    adjacent_operations(graph, op, Direction::Backward)
}

/// Search upstream of `start` for operators whose type is in `stop`.
///
/// The search is breadth first. It continues through operators whose type is
/// in `allowed` and ends at any other operator. Operators matching `stop` are
/// returned in the order they are found and are not searched through.
pub fn backward_bfs(
    graph: &Graph,
    start: NodeId,
    allowed: &[OpType],
    stop: &[OpType],
) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut queued = FxHashSet::default();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for prev in prev_operations(graph, node) {
            let Some(op) = graph.get_op(prev) else {
                continue;
            };
            if stop.contains(op.op_type()) {
                if !found.contains(&prev) {
                    found.push(prev);
                }
            } else if allowed.contains(op.op_type()) && queued.insert(prev) {
                queue.push_back(prev);
            }
        }
    }

    found
}
