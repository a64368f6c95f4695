use std::num::NonZero;

/// ID of a node in a [`Graph`](super::Graph).
///
/// IDs are allocated sequentially by the graph and are never reused, so an
/// ID stays valid for the lifetime of the graph. Operator and data nodes share
/// the same ID space.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

/// ID of an edge in a [`Graph`](super::Graph).
///
/// Removed edges leave their ID unused, so IDs of remaining edges are stable
/// while the graph is rewritten.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EdgeId(NonZero<u32>);

macro_rules! impl_id {
    ($type:ident, $label:literal) => {
        impl $type {
            /// Return the underlying ID as a usize, for slice indexing.
            pub fn as_usize(self) -> usize {
                (self.0.get() - 1) as usize
            }

            /// Construct an ID from a slice index.
            ///
            /// Panics if the index does not fit in a `u32`.
            pub fn from_usize(index: usize) -> Self {
                let value = u32::try_from(index)
                    .ok()
                    .and_then(|i| i.checked_add(1))
                    .and_then(NonZero::new)
                    .expect(concat!($label, " index out of range"));
                $type(value)
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.as_usize().fmt(f)
            }
        }

        impl std::fmt::Debug for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", $label, self.as_usize())
            }
        }
    };
}

impl_id!(NodeId, "NodeId");
impl_id!(EdgeId, "EdgeId");

#[cfg(test)]
mod tests {
    use super::{EdgeId, NodeId};

    #[test]
    fn test_id_round_trips_index() {
        let id = NodeId::from_usize(42);
        assert_eq!(id.as_usize(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(format!("{:?}", id), "NodeId(42)");
        assert_eq!(format!("{:?}", EdgeId::from_usize(0)), "EdgeId(0)");
    }

    #[test]
    fn test_option_id_is_niche_optimized() {
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }
}
