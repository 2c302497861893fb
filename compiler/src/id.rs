// id.rs — Dense identifiers for compiler artifacts
//
// Patch-level indices (`BlockIndex`, `BusIndex`) are assigned once by the
// normalizer from sorted identities. IR-level ids are handles into the
// builder's arenas and are only ever issued by `IrBuilder` (or `ConstPool`).

use std::fmt;

use serde::Serialize;

macro_rules! dense_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(i: usize) -> Self {
                $name(i as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

dense_id!(
    /// Position of a block in lexicographic order of block identities.
    BlockIndex,
    "b"
);
dense_id!(
    /// Position of a bus in lexicographic order of bus identities.
    BusIndex,
    "bus"
);
dense_id!(
    /// Entry in the constant pool.
    ConstId,
    "c"
);
dense_id!(
    /// Entry in the signal expression table.
    SigExprId,
    "sig"
);
dense_id!(
    /// Entry in the field expression table.
    FieldExprId,
    "fld"
);
dense_id!(
    /// Entry in the event expression table.
    EventExprId,
    "evt"
);
dense_id!(
    /// Storage slot for an evaluated value.
    SlotId,
    "slot"
);
dense_id!(
    /// Persistent state cell owned by a state-boundary block.
    StateId,
    "state"
);
dense_id!(
    /// Handle for a non-expression IR artifact (element domain, render sink, camera).
    HandleId,
    "h"
);
dense_id!(
    /// Node in the dependency graph (blocks first, then buses).
    NodeIx,
    "n"
);
