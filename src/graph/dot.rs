use std::fmt::Write;

use super::{Graph, Node};

/// Escape a string for use inside a double-quoted DOT label.
fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Graph {
    /// Render the graph in Graphviz DOT format.
    ///
    /// Operators are drawn as boxes labeled with their name, type and stride
    /// attributes. Data nodes are drawn as ellipses labeled with their name
    /// and shape. Edges are labeled with their ports.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph G {\n");
        dot.push_str("  rankdir=TB;\n");

        for (id, node) in self.iter() {
            let (shape, label) = match node {
                Node::Operator(op) => {
                    let mut label = format!("{}\\n{}", escape(op.name()), op.op_type());
                    let attrs = op.attrs();
                    if let Some(stride) = attrs.stride {
                        let _ = write!(label, "\\nstride={:?}", stride);
                    }
                    if let Some(stride_prop) = attrs.stride_prop {
                        let _ = write!(label, "\\nstride_prop={:?}", stride_prop);
                    }
                    ("box", label)
                }
                Node::Data(data) => {
                    let mut label = escape(data.name());
                    if let Some(shape) = data.shape() {
                        let _ = write!(label, "\\n{:?}", shape);
                    }
                    ("ellipse", label)
                }
            };
            let _ = writeln!(
                dot,
                "  n{} [shape={}, label=\"{}\"];",
                id.as_usize(),
                shape,
                label
            );
        }

        for (id, _) in self.iter() {
            for (_, edge) in self.out_edges(id) {
                let attrs = edge.attrs();
                let _ = writeln!(
                    dot,
                    "  n{} -> n{} [label=\"{}:{}\"];",
                    edge.src().as_usize(),
                    edge.dst().as_usize(),
                    attrs.out_port,
                    attrs.in_port
                );
            }
        }

        dot.push_str("}\n");
        dot
    }
}
