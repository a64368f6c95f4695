use std::fmt;

/// Per-axis stride of a 4D tensor operation, one entry per tensor axis.
pub type Stride = [usize; 4];

/// Stride which performs no subsampling along any axis.
pub const IDENTITY_STRIDE: Stride = [1, 1, 1, 1];

/// Operator category of an operator node.
///
/// This is a closed set of the categories that graph passes treat specially.
/// Everything else is carried as [`OpType::Other`] with its original name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpType {
    Convolution,
    ReLU,
    Eltwise,
    Pooling,
    Other(String),
}

impl OpType {
    /// Map an operator type name, as assigned by a model extractor, to a
    /// category.
    pub fn from_name(name: &str) -> OpType {
        match name {
            "Convolution" => OpType::Convolution,
            "ReLU" => OpType::ReLU,
            "Eltwise" => OpType::Eltwise,
            "Pooling" => OpType::Pooling,
            other => OpType::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OpType::Convolution => "Convolution",
            OpType::ReLU => "ReLU",
            OpType::Eltwise => "Eltwise",
            OpType::Pooling => "Pooling",
            OpType::Other(name) => name,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction applied over each window by a pooling operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolMethod {
    Avg,
    Max,
}

/// Attributes of an operator node.
///
/// Every field is optional. An absent value means "no information" and is
/// distinct from a present value which happens to be zero or identity.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpAttrs {
    /// Subsampling factor along each tensor axis.
    pub stride: Option<Stride>,

    /// Kernel height and width of a convolution.
    pub kernel_spatial: Option<[usize; 2]>,

    /// Whether the operator can absorb a stride itself.
    pub has_stride: Option<bool>,

    /// Cumulative downstream stride which this node has not absorbed.
    ///
    /// Set by stride propagation when the node is visited.
    pub stride_prop: Option<Stride>,

    /// `Some(false)` if the node's outputs are stale and must be re-inferred.
    pub is_partial_inferred: Option<bool>,

    /// `[begin, end]` padding along each tensor axis.
    pub pad: Option<[[usize; 2]; 4]>,

    /// Kernel dilation along each tensor axis.
    pub dilation: Option<Stride>,

    /// Pooling window size along each tensor axis.
    pub window: Option<[usize; 4]>,

    pub pool_method: Option<PoolMethod>,

    /// Number of output channels produced by a convolution.
    pub output_channels: Option<usize>,
}

impl OpAttrs {
    /// Create attributes for a convolution with a given kernel size and stride.
    pub fn convolution(kernel_spatial: [usize; 2], stride: Stride) -> OpAttrs {
        OpAttrs {
            kernel_spatial: Some(kernel_spatial),
            stride: Some(stride),
            ..Default::default()
        }
    }

    /// Create attributes for an unpadded pooling operator.
    pub fn pooling(window: [usize; 4], stride: Stride, method: PoolMethod) -> OpAttrs {
        OpAttrs {
            window: Some(window),
            stride: Some(stride),
            pad: Some([[0, 0]; 4]),
            pool_method: Some(method),
            ..Default::default()
        }
    }

    /// Return true if the `has_stride` capability is present and set.
    pub fn has_stride(&self) -> bool {
        self.has_stride == Some(true)
    }

    /// Return true if the node's outputs must be re-inferred.
    pub fn is_stale(&self) -> bool {
        self.is_partial_inferred == Some(false)
    }

    /// Flag the node's outputs for re-inference.
    pub fn mark_stale(&mut self) {
        self.is_partial_inferred = Some(false);
    }
}

#[derive(Debug)]
pub struct OperatorNode {
    name: String,
    op_type: OpType,
    attrs: OpAttrs,
}

impl OperatorNode {
    pub fn new(name: &str, op_type: OpType, attrs: OpAttrs) -> Self {
        OperatorNode {
            name: name.to_string(),
            op_type,
            attrs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &OpType {
        &self.op_type
    }

    pub fn attrs(&self) -> &OpAttrs {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut OpAttrs {
        &mut self.attrs
    }
}

/// A tensor produced by one operator and consumed by zero or more operators.
#[derive(Debug)]
pub struct DataNode {
    name: String,
    shape: Option<Vec<usize>>,
    fw_tensor_debug_info: Option<String>,
}

impl DataNode {
    pub fn new(name: &str, shape: Option<Vec<usize>>) -> Self {
        DataNode {
            name: name.to_string(),
            shape,
            fw_tensor_debug_info: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the shape of this tensor, if known.
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    pub fn set_shape(&mut self, shape: Option<Vec<usize>>) {
        self.shape = shape;
    }

    /// Provenance of this tensor in the source framework's model, used to
    /// map optimized tensors back to the source model.
    pub fn fw_tensor_debug_info(&self) -> Option<&str> {
        self.fw_tensor_debug_info.as_deref()
    }

    pub fn set_fw_tensor_debug_info(&mut self, info: &str) {
        self.fw_tensor_debug_info = Some(info.to_string());
    }

    /// Drop provenance metadata which no longer describes this tensor after
    /// the graph has been rewritten.
    pub fn clear_fw_tensor_attrs(&mut self) {
        self.fw_tensor_debug_info = None;
    }
}

#[derive(Debug)]
pub enum Node {
    Operator(OperatorNode),
    Data(DataNode),
}

impl Node {
    /// Return the debug name of this node
    pub fn name(&self) -> &str {
        match self {
            Node::Operator(op) => op.name(),
            Node::Data(data) => data.name(),
        }
    }

    /// Return the contained operator, if this an operator node.
    pub fn as_operator(&self) -> Option<&OperatorNode> {
        match self {
            Node::Operator(op) => Some(op),
            Node::Data(_) => None,
        }
    }

    pub fn as_operator_mut(&mut self) -> Option<&mut OperatorNode> {
        match self {
            Node::Operator(op) => Some(op),
            Node::Data(_) => None,
        }
    }

    /// Return the contained tensor, if this a data node.
    pub fn as_data(&self) -> Option<&DataNode> {
        match self {
            Node::Data(data) => Some(data),
            Node::Operator(_) => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataNode> {
        match self {
            Node::Data(data) => Some(data),
            Node::Operator(_) => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, Node::Operator(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{OpAttrs, OpType};

    #[test]
    fn test_op_type_from_name() {
        assert_eq!(OpType::from_name("Convolution"), OpType::Convolution);
        assert_eq!(OpType::from_name("ReLU"), OpType::ReLU);
        assert_eq!(
            OpType::from_name("Concat"),
            OpType::Other("Concat".to_string())
        );
        assert_eq!(OpType::from_name("Concat").name(), "Concat");
        assert_eq!(OpType::Eltwise.to_string(), "Eltwise");
    }

    #[test]
    fn test_absent_attrs_are_not_identity() {
        let attrs = OpAttrs::default();
        assert_eq!(attrs.stride_prop, None);
        assert!(!attrs.has_stride());
        assert!(!attrs.is_stale());

        let mut attrs = OpAttrs::convolution([1, 1], [1, 1, 2, 2]);
        attrs.mark_stale();
        assert!(attrs.is_stale());
        assert_eq!(attrs.stride, Some([1, 1, 2, 2]));
    }
}
