use std::error::Error;
use std::fmt;

// The std HashMap/HashSet provide DOS resistance. Keys here are node names
// and IDs we allocate ourselves, so this is not a concern. Instead we want
// faster hashing.
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

mod dot;
mod layout;
mod node;
mod node_id;
pub mod traversal;


pub use layout::Layout;
pub use node::{
    DataNode, Node, OpAttrs, OpType, OperatorNode, PoolMethod, Stride, IDENTITY_STRIDE,
};
pub use node_id::{EdgeId, NodeId};

/// Metadata attached to an edge.
///
/// For an edge from an operator to a data node, `out_port` is the index of
/// the operator output. For an edge from a data node to an operator,
/// `in_port` is the index of the operator input.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeAttrs {
    pub out_port: usize,
    pub in_port: usize,
}

impl EdgeAttrs {
    /// Attributes for an edge feeding operator input `in_port`.
    pub fn input(in_port: usize) -> EdgeAttrs {
        EdgeAttrs {
            out_port: 0,
            in_port,
        }
    }

    /// Attributes for an edge leaving operator output `out_port`.
    pub fn output(out_port: usize) -> EdgeAttrs {
        EdgeAttrs {
            out_port,
            in_port: 0,
        }
    }
}

/// A directed edge between an operator node and a data node.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    src: NodeId,
    dst: NodeId,
    attrs: EdgeAttrs,
}

impl Edge {
    pub fn src(&self) -> NodeId {
        self.src
    }

    pub fn dst(&self) -> NodeId {
        self.dst
    }

    pub fn attrs(&self) -> &EdgeAttrs {
        &self.attrs
    }
}

/// Structural problems detected by [`Graph::validate`].
#[derive(Clone, Debug, PartialEq)]
pub enum GraphError {
    /// A data node has no producing operator.
    MissingProducer { data: String },

    /// A data node has more than one producing edge.
    MultipleProducers { data: String, count: usize },

    /// An edge connects two operators or two data nodes.
    InvalidEdge { src: String, dst: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::MissingProducer { data } => {
                write!(f, "data node \"{}\" has no producer", data)
            }
            GraphError::MultipleProducers { data, count } => {
                write!(f, "data node \"{}\" has {} producers", data, count)
            }
            GraphError::InvalidEdge { src, dst } => write!(
                f,
                "edge from \"{}\" to \"{}\" does not connect an operator and a data node",
                src, dst
            ),
        }
    }
}

impl Error for GraphError {}

/// A computation graph of alternating operator and data nodes.
///
/// Operators produce data nodes (tensors) via edges to them and consume data
/// nodes via edges from them. The graph is a multigraph: two nodes may be
/// connected by several edges with different [`EdgeAttrs`].
///
/// Removing an edge never removes its endpoints.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,

    /// Edges indexed by [`EdgeId`]. Removed edges are left as `None`.
    edges: Vec<Option<Edge>>,

    /// IDs of live edges entering and leaving each node, in insertion order.
    in_edges: Vec<SmallVec<[EdgeId; 2]>>,
    out_edges: Vec<SmallVec<[EdgeId; 2]>>,

    names: FxHashSet<String>,
    name_counter: usize,

    /// Layout name as supplied by the model producer.
    layout: Option<String>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Create an empty graph with a given layout name.
    pub fn with_layout(layout: &str) -> Graph {
        let mut graph = Graph::new();
        graph.set_layout(layout);
        graph
    }

    /// Return the graph-level layout name, if set.
    ///
    /// Use [`Layout::parse`] to interpret it.
    pub fn layout(&self) -> Option<&str> {
        self.layout.as_deref()
    }

    pub fn set_layout(&mut self, layout: &str) {
        self.layout = Some(layout.to_string());
    }

    /// Add an operator node to the graph.
    ///
    /// `name` is used in debug messages and diagnostics. Returns the ID of the
    /// operator node.
    pub fn add_op(&mut self, name: &str, op_type: OpType, attrs: OpAttrs) -> NodeId {
        self.push_node(Node::Operator(OperatorNode::new(name, op_type, attrs)))
    }

    /// Add a data node to the graph.
    ///
    /// `shape` is the shape of the tensor, or `None` if not yet inferred.
    pub fn add_data(&mut self, name: &str, shape: Option<Vec<usize>>) -> NodeId {
        self.push_node(Node::Data(DataNode::new(name, shape)))
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_usize(self.nodes.len());
        self.names.insert(node.name().to_string());
        self.nodes.push(node);
        self.in_edges.push(SmallVec::new());
        self.out_edges.push(SmallVec::new());
        id
    }

    /// Add an edge from `src` to `dst`.
    ///
    /// Panics if either node ID is not part of this graph.
    pub fn add_edge(&mut self, src: NodeId, dst: NodeId, attrs: EdgeAttrs) -> EdgeId {
        assert!(
            src.as_usize() < self.nodes.len() && dst.as_usize() < self.nodes.len(),
            "edge {} -> {} refers to a node that is not in the graph",
            src,
            dst
        );
        let id = EdgeId::from_usize(self.edges.len());
        self.edges.push(Some(Edge { src, dst, attrs }));
        self.out_edges[src.as_usize()].push(id);
        self.in_edges[dst.as_usize()].push(id);
        id
    }

    /// Remove an edge and return it.
    ///
    /// The endpoints of the edge remain in the graph. Returns `None` if the
    /// edge was already removed.
    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.get_mut(id.as_usize())?.take()?;
        self.out_edges[edge.src.as_usize()].retain(|e| *e != id);
        self.in_edges[edge.dst.as_usize()].retain(|e| *e != id);
        Some(edge)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.as_usize()).and_then(|e| e.as_ref())
    }

    /// Return the IDs of all edges from `src` to `dst`.
    pub fn edges_between(&self, src: NodeId, dst: NodeId) -> SmallVec<[EdgeId; 2]> {
        self.out_edges(src)
            .filter(|(_, edge)| edge.dst == dst)
            .map(|(id, _)| id)
            .collect()
    }

    /// Iterate over edges entering `node`, in insertion order.
    pub fn in_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edge_list(&self.in_edges, node)
    }

    /// Iterate over edges leaving `node`, in insertion order.
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edge_list(&self.out_edges, node)
    }

    fn edge_list<'a>(
        &'a self,
        lists: &'a [SmallVec<[EdgeId; 2]>],
        node: NodeId,
    ) -> impl Iterator<Item = (EdgeId, &'a Edge)> {
        lists
            .get(node.as_usize())
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.edge(*id).map(|edge| (*id, edge)))
    }

    /// Return the operator which produces a data node.
    pub fn producer(&self, data: NodeId) -> Option<NodeId> {
        self.in_edges(data).map(|(_, edge)| edge.src).next()
    }

    /// Return the distinct nodes which consume `node`, in edge order.
    pub fn consumers(&self, node: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut consumers = SmallVec::new();
        for (_, edge) in self.out_edges(node) {
            if !consumers.contains(&edge.dst) {
                consumers.push(edge.dst);
            }
        }
        consumers
    }

    /// Return the data nodes consumed by an operator, ordered by input port.
    pub fn op_inputs(&self, op: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut inputs: SmallVec<[(usize, NodeId); 4]> = self
            .in_edges(op)
            .map(|(_, edge)| (edge.attrs.in_port, edge.src))
            .collect();
        inputs.sort_by_key(|(port, _)| *port);
        inputs.into_iter().map(|(_, id)| id).collect()
    }

    /// Return the data nodes produced by an operator, ordered by output port.
    pub fn op_outputs(&self, op: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut outputs: SmallVec<[(usize, NodeId); 4]> = self
            .out_edges(op)
            .map(|(_, edge)| (edge.attrs.out_port, edge.dst))
            .collect();
        outputs.sort_by_key(|(port, _)| *port);
        outputs.into_iter().map(|(_, id)| id).collect()
    }

    /// Retrieve a node by ID
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize())
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.as_usize())
    }

    /// Retrieve an operator node by ID.
    pub fn get_op(&self, id: NodeId) -> Option<&OperatorNode> {
        self.get_node(id).and_then(|n| n.as_operator())
    }

    pub fn get_op_mut(&mut self, id: NodeId) -> Option<&mut OperatorNode> {
        self.get_node_mut(id).and_then(|n| n.as_operator_mut())
    }

    /// Retrieve a data node by ID.
    pub fn get_data(&self, id: NodeId) -> Option<&DataNode> {
        self.get_node(id).and_then(|n| n.as_data())
    }

    pub fn get_data_mut(&mut self, id: NodeId) -> Option<&mut DataNode> {
        self.get_node_mut(id).and_then(|n| n.as_data_mut())
    }

    /// Return the debug name for a node.
    pub fn node_name(&self, id: NodeId) -> String {
        self.get_node(id)
            .map(|node| node.name().to_string())
            .unwrap_or_else(|| format!("[ID: {}]", id))
    }

    /// Iterate over nodes and their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::from_usize(i), node))
    }

    /// Return the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return the number of live edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    /// Generate a node name starting with `prefix` that is not yet used by
    /// any node in the graph.
    pub fn unique_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{}{}", prefix, self.name_counter);
            self.name_counter += 1;
            if !self.names.contains(&name) {
                return name;
            }
        }
    }

    /// Add an operator with a single output data node.
    ///
    /// `inputs` are connected to input ports `0..inputs.len()`. Returns the
    /// IDs of the operator and its output.
    pub fn add_simple_op(
        &mut self,
        name: &str,
        op_type: OpType,
        attrs: OpAttrs,
        inputs: &[NodeId],
    ) -> (NodeId, NodeId) {
        let op_id = self.add_op(name, op_type, attrs);
        for (port, input) in inputs.iter().enumerate() {
            self.add_edge(*input, op_id, EdgeAttrs::input(port));
        }
        let output_name = format!("{}_out", name);
        let output_id = self.add_data(&output_name, None);
        self.add_edge(op_id, output_id, EdgeAttrs::output(0));
        (op_id, output_id)
    }

    /// Check that the graph is a well-formed alternation of operator and data
    /// nodes in which every data node has exactly one producer.
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge in self.edges.iter().flatten() {
            let src_is_op = self.nodes[edge.src.as_usize()].is_operator();
            let dst_is_op = self.nodes[edge.dst.as_usize()].is_operator();
            if src_is_op == dst_is_op {
                return Err(GraphError::InvalidEdge {
                    src: self.node_name(edge.src),
                    dst: self.node_name(edge.dst),
                });
            }
        }

        for (id, node) in self.iter() {
            if node.is_operator() {
                continue;
            }
            match self.in_edges(id).count() {
                1 => {}
                0 => {
                    return Err(GraphError::MissingProducer {
                        data: node.name().to_string(),
                    })
                }
                count => {
                    return Err(GraphError::MultipleProducers {
                        data: node.name().to_string(),
                        count,
                    })
                }
            }
        }

        Ok(())
    }
}
