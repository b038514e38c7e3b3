//! Runtime half of simbind: binds a compiled class to native code and
//! manages the memory of its instances.

mod array;
mod buffer;
mod class;
mod dispatch;
mod errors;
mod instance;
mod longdouble;
mod native;
mod object;
mod scalar;
mod state;
mod value;
mod view;

pub use array::{ArrayData, ArrayError, CArray};
pub use class::{CallOutcome, CallWrapper, ClassBuilder, SimClass};
pub use dispatch::{ArgValue, CallArgs};
pub use errors::{
    AxisKey, BindError, BindResult, ExtentSource, IndexBound, ShapeConflict, ShapeContributor, ShapeReport,
};
pub use instance::Instance;
pub use native::{NativeLibrary, SymbolSource, SymbolTable};
pub use object::NativeObject;
pub use scalar::{ConversionError, Element, Scalar};
pub use state::{ArraySnapshot, InstanceState, StateValue};
pub use value::{InPlace, Overrides, Value};

pub use simbind_gen::{ClassMetadata, SubsetFlags};
pub use simbind_types::{ClassSpec, CType, SubsetDef};
