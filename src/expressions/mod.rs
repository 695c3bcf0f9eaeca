//! Symbol resolution for embedded expression and template engines.

pub mod configuration;
pub mod members;
pub mod resolver;

pub use configuration::ConfigurationSection;
pub use members::{
    MemberAccessRegistry, MemberAccessRegistryBuilder, MemberLookup, StaticVariableTypeCatalog,
    TypeShape, VariableDescriptor, VariableTypeCatalog,
};
pub use resolver::{ExpressionContext, Resolution, SymbolResolver};
