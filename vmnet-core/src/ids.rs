//! Typed identifiers for nodes, links, VMs and flows.

use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl $name {
            /// Raw index.
            #[inline]
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }
    };
}

typed_id!(
    /// Node index. Nodes are numbered breadth-first, the root is 0.
    NodeId,
    "n"
);
typed_id!(
    /// Link index. Link `l` is the uplink of node `l + 1`.
    LinkId,
    "l"
);
typed_id!(
    /// Virtual machine index.
    VmId,
    "vm"
);
typed_id!(
    /// Flow index.
    FlowId,
    "f"
);
