//! Compiles class specs into layout and dispatch metadata.

pub mod class;
pub mod codegen;
pub mod errors;
pub mod info;
pub mod layout;
pub mod subsets;

pub use class::{compile_class_spec, ArgBinding, ClassMetadata, CompiledFunction, IndexVariable};
pub use errors::{CompileDiagnostic, CompileError};
pub use info::{MemberCategory, MemberFilter, MemberSummary};
pub use layout::{align_up, FieldLayout, FieldType, StructLayout};
pub use subsets::{Subset, SubsetError, SubsetFlags, SubsetRegistry, UnknownSubsetName};
