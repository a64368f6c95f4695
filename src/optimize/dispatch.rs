use crate::graph::{OpAttrs, OpType};

/// Strategy used to propagate strides through an operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropagationHandler {
    /// Pass an agreed downstream stride through the operator unchanged.
    ///
    /// Used for operators which are spatially point-wise.
    Generic,

    /// Absorb an agreed downstream stride into the operator's own stride.
    Convolution,
}

/// Attributes applied to an operator before its propagation handler runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultAttrs {
    /// Value for [`OpAttrs::has_stride`].
    pub has_stride: Option<bool>,
}

impl DefaultAttrs {
    /// Write these defaults into an operator's attributes.
    pub fn apply(&self, attrs: &mut OpAttrs) {
        if let Some(has_stride) = self.has_stride {
            attrs.has_stride = Some(has_stride);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DispatchEntry {
    pub handler: PropagationHandler,
    pub defaults: DefaultAttrs,
}

/// Look up how strides propagate through an operator type.
///
/// Returns `None` if the type does not support stride propagation. Such
/// operators are handled by [`PropagationHandler::Generic`] in unsupported
/// mode, which materializes any pending downstream strides.
pub fn dispatch(op_type: &OpType) -> Option<DispatchEntry> {
    match op_type {
        OpType::ReLU | OpType::Eltwise => Some(DispatchEntry {
            handler: PropagationHandler::Generic,
            defaults: DefaultAttrs::default(),
        }),
        OpType::Convolution => Some(DispatchEntry {
            handler: PropagationHandler::Convolution,
            defaults: DefaultAttrs {
                has_stride: Some(true),
            },
        }),
        OpType::Pooling | OpType::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use rten_testing::TestCases;

    use super::{dispatch, PropagationHandler};
    use crate::graph::{OpAttrs, OpType};

    #[test]
    fn test_dispatch() {
        #[derive(Debug)]
        struct Case {
            op_type: OpType,
            handler: Option<PropagationHandler>,
            has_stride: Option<bool>,
        }

        let cases = [
            Case {
                op_type: OpType::ReLU,
                handler: Some(PropagationHandler::Generic),
                has_stride: None,
            },
            Case {
                op_type: OpType::Eltwise,
                handler: Some(PropagationHandler::Generic),
                has_stride: None,
            },
            Case {
                op_type: OpType::Convolution,
                handler: Some(PropagationHandler::Convolution),
                has_stride: Some(true),
            },
            Case {
                op_type: OpType::Pooling,
                handler: None,
                has_stride: None,
            },
            Case {
                op_type: OpType::from_name("Concat"),
                handler: None,
                has_stride: None,
            },
        ];

        cases.test_each(|case| {
            let entry = dispatch(&case.op_type);
            assert_eq!(entry.map(|e| e.handler), case.handler);

            let mut attrs = OpAttrs::default();
            if let Some(entry) = entry {
                entry.defaults.apply(&mut attrs);
            }
            assert_eq!(attrs.has_stride, case.has_stride);
        })
    }
}
