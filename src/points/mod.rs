//! Point descriptors and the resolver that maps them to wire positions.

pub mod descriptor;
pub mod resolver;

pub use descriptor::{
    EngineKey, InputBinding, OutputBinding, PointBinding, PointDescriptor, PointError, PointTable,
    Role, VariableDeclaration, VariableSlot,
};
pub use resolver::PointResolver;
