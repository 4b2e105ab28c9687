// node.rs - Operation catalog for lowered kernels
//
// Every expression in the linear IR wraps a `Node`. Nodes expose capabilities
// instead of being inspected by concrete type: a node that addresses memory
// through movable pointers returns itself from `as_memory_access`, and the
// intermediate buffer marker answers `is_intermediate_buffer`.

use std::fmt;

/// An operation of the lowered kernel.
pub trait Node: fmt::Debug {
    /// Operation name as written in kernel sources.
    fn type_name(&self) -> &'static str;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Capability query: `Some` for operations whose operands are addressable
    /// memory with a pointer that loops may advance.
    fn as_memory_access(&self) -> Option<&dyn MemoryAccess> {
        None
    }

    /// True for the storage step separating a producer loop nest from its
    /// consumer loop nests.
    fn is_intermediate_buffer(&self) -> bool {
        false
    }
}

/// Marker capability for memory-access operations.
pub trait MemoryAccess: Node {}

// ── Memory-access operations ───────────────────────────────────────────────

macro_rules! memory_access_node {
    ($ty:ident, $name:literal, $inputs:literal, $outputs:literal) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $ty;

        impl Node for $ty {
            fn type_name(&self) -> &'static str {
                $name
            }
            fn input_count(&self) -> usize {
                $inputs
            }
            fn output_count(&self) -> usize {
                $outputs
            }
            fn as_memory_access(&self) -> Option<&dyn MemoryAccess> {
                Some(self)
            }
        }

        impl MemoryAccess for $ty {}
    };
}

memory_access_node!(Load, "Load", 1, 1);
memory_access_node!(BroadcastLoad, "BroadcastLoad", 1, 1);
memory_access_node!(LoadReshape, "LoadReshape", 1, 1);
memory_access_node!(Store, "Store", 1, 1);
memory_access_node!(Brgemm, "Brgemm", 2, 1);

// ── Graph boundaries and buffers ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct Parameter;

impl Node for Parameter {
    fn type_name(&self) -> &'static str {
        "Parameter"
    }
    fn input_count(&self) -> usize {
        0
    }
    fn output_count(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultNode;

impl Node for ResultNode {
    fn type_name(&self) -> &'static str {
        "Result"
    }
    fn input_count(&self) -> usize {
        1
    }
    fn output_count(&self) -> usize {
        0
    }
}

/// Intermediate storage between two loop nests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntermediateMemoryBuffer;

impl Node for IntermediateMemoryBuffer {
    fn type_name(&self) -> &'static str {
        "Buffer"
    }
    fn input_count(&self) -> usize {
        1
    }
    fn output_count(&self) -> usize {
        1
    }
    fn is_intermediate_buffer(&self) -> bool {
        true
    }
}

// ── Pure compute ───────────────────────────────────────────────────────────

/// Register-level operation; never owns an incrementable pointer.
#[derive(Debug, Clone, Copy)]
pub struct Compute {
    name: &'static str,
    inputs: usize,
}

impl Node for Compute {
    fn type_name(&self) -> &'static str {
        self.name
    }
    fn input_count(&self) -> usize {
        self.inputs
    }
    fn output_count(&self) -> usize {
        1
    }
}

const COMPUTE_OPS: &[(&str, usize)] = &[
    ("Scalar", 0),
    ("VectorBuffer", 0),
    ("Fill", 1),
    ("Convert", 1),
    ("Exp", 1),
    ("Relu", 1),
    ("Negative", 1),
    ("Sqrt", 1),
    ("PowerStatic", 1),
    ("HorizonMax", 1),
    ("HorizonSum", 1),
    ("Add", 2),
    ("Subtract", 2),
    ("Multiply", 2),
    ("Divide", 2),
    ("Maximum", 2),
    ("Minimum", 2),
    ("Power", 2),
];

/// Instantiate a node by its kernel-source name.
pub fn make_node(name: &str) -> Option<Box<dyn Node>> {
    let node: Box<dyn Node> = match name {
        "Load" => Box::new(Load),
        "BroadcastLoad" => Box::new(BroadcastLoad),
        "LoadReshape" => Box::new(LoadReshape),
        "Store" => Box::new(Store),
        "Brgemm" => Box::new(Brgemm),
        "Parameter" => Box::new(Parameter),
        "Result" => Box::new(ResultNode),
        "Buffer" => Box::new(IntermediateMemoryBuffer),
        _ => {
            let &(name, inputs) = COMPUTE_OPS.iter().find(|(n, _)| *n == name)?;
            Box::new(Compute { name, inputs })
        }
    };
    Some(node)
}
