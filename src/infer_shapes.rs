//! Shape inference types and traits.
//!
//! Graph passes which change shape-relevant attributes or insert operators
//! mark the affected nodes as stale. [`InferShapes`] is the contract used to
//! recompute the output shapes of those nodes afterwards.

use std::error::Error;
use std::fmt;
use std::iter::repeat;

use smallvec::SmallVec;

use crate::graph::{Graph, Layout, NodeId, OpAttrs, OpType, IDENTITY_STRIDE};

#[derive(Clone, Debug, PartialEq)]
pub enum ShapeInferenceError {
    /// The node is not an operator in the graph.
    InvalidNode,

    /// Too many or too few inputs were provided for this operator.
    IncorrectInputCount,

    /// An input's rank does not match that expected by the operator.
    IncorrectRank,

    /// The input shapes are incompatible with each other or with the
    /// operator's attributes.
    IncompatibleShapes,

    /// A required operator attribute is absent.
    MissingAttribute(&'static str),

    /// The operator needs the graph layout, but it is absent or unknown.
    MissingLayout,

    /// No shape inference is available for this operator type.
    UnsupportedOperator(String),
}

impl fmt::Display for ShapeInferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNode => write!(f, "node is not an operator"),
            Self::IncorrectInputCount => write!(f, "incorrect number of inputs"),
            Self::IncorrectRank => write!(f, "input has incorrect rank"),
            Self::IncompatibleShapes => write!(f, "input shapes are incompatible"),
            Self::MissingAttribute(name) => write!(f, "missing attribute \"{}\"", name),
            Self::MissingLayout => write!(f, "graph layout is missing or unsupported"),
            Self::UnsupportedOperator(op_type) => {
                write!(f, "no shape inference for operator type \"{}\"", op_type)
            }
        }
    }
}

impl Error for ShapeInferenceError {}

/// Recompute the output shapes of an operator from its current inputs and
/// attributes.
pub trait InferShapes {
    /// Update the shapes of the data nodes produced by operator `op`.
    ///
    /// Inputs must already have up-to-date shapes, so callers should invoke
    /// this in dependency order.
    fn infer_shapes(&self, graph: &mut Graph, op: NodeId) -> Result<(), ShapeInferenceError>;
}

/// Built-in shape inference for the operator types that graph passes create
/// or modify.
///
/// Unknown input shapes produce unknown output shapes. Operator types other
/// than `Convolution`, `Pooling`, `ReLU` and `Eltwise` are rejected with
/// [`ShapeInferenceError::UnsupportedOperator`].
#[derive(Default)]
pub struct ShapeInference {}

impl ShapeInference {
    pub fn new() -> Self {
        ShapeInference {}
    }
}

type InputShapes = SmallVec<[Option<Vec<usize>>; 4]>;

impl InferShapes for ShapeInference {
    fn infer_shapes(&self, graph: &mut Graph, op: NodeId) -> Result<(), ShapeInferenceError> {
        let op_node = graph.get_op(op).ok_or(ShapeInferenceError::InvalidNode)?;
        let inputs: InputShapes = graph
            .op_inputs(op)
            .into_iter()
            .map(|id| {
                graph
                    .get_data(id)
                    .and_then(|data| data.shape())
                    .map(|shape| shape.to_vec())
            })
            .collect();
        let layout = graph.layout().and_then(Layout::parse);

        let output_shape = match op_node.op_type() {
            OpType::Convolution => conv_output_shape(layout, op_node.attrs(), &inputs)?,
            OpType::Pooling => pool_output_shape(op_node.attrs(), &inputs)?,
            OpType::ReLU => {
                let [input, ..] = &inputs[..] else {
                    return Err(ShapeInferenceError::IncorrectInputCount);
                };
                input.clone()
            }
            OpType::Eltwise => eltwise_output_shape(&inputs)?,
            OpType::Other(name) => {
                return Err(ShapeInferenceError::UnsupportedOperator(name.clone()));
            }
        };

        for output in graph.op_outputs(op) {
            if let Some(data) = graph.get_data_mut(output) {
                data.set_shape(output_shape.clone());
            }
        }

        Ok(())
    }
}

/// Return the output size for one axis of a convolution or pooling operation
/// with explicit padding.
fn output_size(
    in_size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
    [pad_start, pad_end]: [usize; 2],
) -> Result<usize, ShapeInferenceError> {
    if kernel_size == 0 || stride == 0 || dilation == 0 {
        return Err(ShapeInferenceError::IncompatibleShapes);
    }
    let padded_in_size = in_size + pad_start + pad_end;
    let dilated_kernel_size = dilation * (kernel_size - 1) + 1;
    if padded_in_size < dilated_kernel_size {
        return Err(ShapeInferenceError::IncompatibleShapes);
    }
    Ok((padded_in_size - dilated_kernel_size) / stride + 1)
}

fn conv_output_shape(
    layout: Option<Layout>,
    attrs: &OpAttrs,
    inputs: &[Option<Vec<usize>>],
) -> Result<Option<Vec<usize>>, ShapeInferenceError> {
    let [data, ..] = inputs else {
        return Err(ShapeInferenceError::IncorrectInputCount);
    };
    let Some(data) = data else {
        return Ok(None);
    };
    if data.len() != 4 {
        return Err(ShapeInferenceError::IncorrectRank);
    }
    let layout = layout.ok_or(ShapeInferenceError::MissingLayout)?;
    let kernel = attrs
        .kernel_spatial
        .ok_or(ShapeInferenceError::MissingAttribute("kernel_spatial"))?;
    let stride = attrs.stride.unwrap_or(IDENTITY_STRIDE);
    let dilation = attrs.dilation.unwrap_or(IDENTITY_STRIDE);
    let pad = attrs.pad.unwrap_or_default();

    let mut out_shape = data.clone();
    for (kernel_size, axis) in kernel.into_iter().zip(layout.spatial_dims()) {
        out_shape[axis] = output_size(
            data[axis],
            kernel_size,
            stride[axis],
            dilation[axis],
            pad[axis],
        )?;
    }
    if let Some(channels) = attrs.output_channels {
        out_shape[layout.channel_dim()] = channels;
    }

    Ok(Some(out_shape))
}

fn pool_output_shape(
    attrs: &OpAttrs,
    inputs: &[Option<Vec<usize>>],
) -> Result<Option<Vec<usize>>, ShapeInferenceError> {
    let [data, ..] = inputs else {
        return Err(ShapeInferenceError::IncorrectInputCount);
    };
    let Some(data) = data else {
        return Ok(None);
    };
    if data.len() != 4 {
        return Err(ShapeInferenceError::IncorrectRank);
    }
    let window = attrs
        .window
        .ok_or(ShapeInferenceError::MissingAttribute("window"))?;
    let stride = attrs.stride.unwrap_or(IDENTITY_STRIDE);
    let pad = attrs.pad.unwrap_or_default();

    let out_shape = (0..data.len())
        .map(|axis| output_size(data[axis], window[axis], stride[axis], 1, pad[axis]))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(out_shape))
}

/// Return the shape that results from broadcasting `a` and `b` together
/// following NumPy rules, or `None` if they are not compatible.
///
/// Shapes are left-padded with 1s to the same length, then each pair of
/// dimensions must either match or contain a 1.
fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let a_pad = b.len().saturating_sub(a.len());
    let b_pad = a.len().saturating_sub(b.len());

    let a_iter = a.iter().copied().rev().chain(repeat(1).take(a_pad));
    let b_iter = b.iter().copied().rev().chain(repeat(1).take(b_pad));

    let mut result = Vec::with_capacity(a.len().max(b.len()));
    for (a, b) in a_iter.zip(b_iter) {
        if a == b || b == 1 {
            result.push(a);
        } else if a == 1 {
            result.push(b);
        } else {
            return None;
        }
    }
    result.reverse();

    Some(result)
}

fn eltwise_output_shape(
    inputs: &[Option<Vec<usize>>],
) -> Result<Option<Vec<usize>>, ShapeInferenceError> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(ShapeInferenceError::IncorrectInputCount);
    };
    let Some(mut shape) = first.clone() else {
        return Ok(None);
    };
    for input in rest {
        let Some(input) = input else {
            return Ok(None);
        };
        shape = broadcast_shapes(&shape, input).ok_or(ShapeInferenceError::IncompatibleShapes)?;
    }
    Ok(Some(shape))
}

#[cfg(test)]
mod tests {
    use rten_testing::TestCases;

    use super::{broadcast_shapes, output_size, InferShapes, ShapeInference, ShapeInferenceError};
    use crate::graph::{Graph, OpAttrs, OpType, PoolMethod};

    #[test]
    fn test_output_size() {
        #[derive(Debug)]
        struct Case {
            in_size: usize,
            kernel: usize,
            stride: usize,
            dilation: usize,
            pad: [usize; 2],
            expected: Result<usize, ShapeInferenceError>,
        }

        let cases = [
            Case {
                in_size: 10,
                kernel: 1,
                stride: 2,
                dilation: 1,
                pad: [0, 0],
                expected: Ok(5),
            },
            Case {
                in_size: 10,
                kernel: 3,
                stride: 1,
                dilation: 1,
                pad: [1, 1],
                expected: Ok(10),
            },
            Case {
                in_size: 9,
                kernel: 3,
                stride: 2,
                dilation: 2,
                pad: [0, 0],
                expected: Ok(3),
            },
            Case {
                in_size: 2,
                kernel: 3,
                stride: 1,
                dilation: 1,
                pad: [0, 0],
                expected: Err(ShapeInferenceError::IncompatibleShapes),
            },
            Case {
                in_size: 4,
                kernel: 1,
                stride: 0,
                dilation: 1,
                pad: [0, 0],
                expected: Err(ShapeInferenceError::IncompatibleShapes),
            },
        ];

        cases.test_each(|case| {
            let size = output_size(
                case.in_size,
                case.kernel,
                case.stride,
                case.dilation,
                case.pad,
            );
            assert_eq!(size, case.expected);
        })
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(
            broadcast_shapes(&[1, 8, 4, 4], &[8, 1, 1]),
            Some(vec![1, 8, 4, 4])
        );
        assert_eq!(broadcast_shapes(&[1, 8, 4, 4], &[1, 8, 2, 2]), None);
    }

    #[test]
    fn test_infer_conv_nchw() {
        let mut graph = Graph::with_layout("NCHW");
        let input = graph.add_data("input", Some(vec![1, 3, 16, 16]));
        let attrs = OpAttrs {
            output_channels: Some(8),
            pad: Some([[0, 0], [0, 0], [1, 1], [1, 1]]),
            ..OpAttrs::convolution([3, 3], [1, 1, 2, 2])
        };
        let (conv, conv_out) = graph.add_simple_op("conv", OpType::Convolution, attrs, &[input]);

        ShapeInference::new().infer_shapes(&mut graph, conv).unwrap();

        let shape = graph.get_data(conv_out).and_then(|d| d.shape());
        assert_eq!(shape, Some([1, 8, 8, 8].as_slice()));
    }

    #[test]
    fn test_infer_conv_nhwc_keeps_channels() {
        let mut graph = Graph::with_layout("NHWC");
        let input = graph.add_data("input", Some(vec![1, 10, 6, 3]));
        let attrs = OpAttrs::convolution([1, 1], [1, 2, 3, 1]);
        let (conv, conv_out) = graph.add_simple_op("conv", OpType::Convolution, attrs, &[input]);

        ShapeInference::new().infer_shapes(&mut graph, conv).unwrap();

        let shape = graph.get_data(conv_out).and_then(|d| d.shape());
        assert_eq!(shape, Some([1, 5, 2, 3].as_slice()));
    }

    #[test]
    fn test_infer_conv_requires_layout() {
        let mut graph = Graph::new();
        let input = graph.add_data("input", Some(vec![1, 3, 4, 4]));
        let attrs = OpAttrs::convolution([1, 1], [1, 1, 1, 1]);
        let (conv, _) = graph.add_simple_op("conv", OpType::Convolution, attrs, &[input]);

        let result = ShapeInference::new().infer_shapes(&mut graph, conv);

        assert_eq!(result, Err(ShapeInferenceError::MissingLayout));
    }

    #[test]
    fn test_infer_pointwise_pooling() {
        let mut graph = Graph::with_layout("NCHW");
        let input = graph.add_data("input", Some(vec![1, 4, 7, 7]));
        let attrs = OpAttrs::pooling([1, 1, 1, 1], [1, 1, 2, 2], PoolMethod::Avg);
        let (pool, pool_out) = graph.add_simple_op("pool", OpType::Pooling, attrs, &[input]);

        ShapeInference::new().infer_shapes(&mut graph, pool).unwrap();

        let shape = graph.get_data(pool_out).and_then(|d| d.shape());
        assert_eq!(shape, Some([1, 4, 4, 4].as_slice()));
    }

    #[test]
    fn test_infer_eltwise_and_unknown_shapes() {
        let mut graph = Graph::with_layout("NCHW");
        let a = graph.add_data("a", Some(vec![1, 4, 5, 5]));
        let b = graph.add_data("b", Some(vec![4, 1, 1]));
        let c = graph.add_data("c", None);
        let (add, add_out) =
            graph.add_simple_op("add", OpType::Eltwise, OpAttrs::default(), &[a, b]);
        let (relu, relu_out) = graph.add_simple_op("relu", OpType::ReLU, OpAttrs::default(), &[c]);

        let infer = ShapeInference::new();
        infer.infer_shapes(&mut graph, add).unwrap();
        infer.infer_shapes(&mut graph, relu).unwrap();

        let add_shape = graph.get_data(add_out).and_then(|d| d.shape());
        assert_eq!(add_shape, Some([1, 4, 5, 5].as_slice()));
        assert_eq!(graph.get_data(relu_out).and_then(|d| d.shape()), None);
    }

    #[test]
    fn test_infer_unsupported_operator() {
        let mut graph = Graph::with_layout("NCHW");
        let input = graph.add_data("input", Some(vec![1, 4, 5, 5]));
        let (op, _) = graph.add_simple_op(
            "concat",
            OpType::from_name("Concat"),
            OpAttrs::default(),
            &[input],
        );

        let result = ShapeInference::new().infer_shapes(&mut graph, op);

        assert_eq!(
            result,
            Err(ShapeInferenceError::UnsupportedOperator("Concat".into()))
        );
        assert_eq!(
            ShapeInference::new().infer_shapes(&mut graph, input),
            Err(ShapeInferenceError::InvalidNode)
        );
    }
}
