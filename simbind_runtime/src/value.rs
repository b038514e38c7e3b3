use crate::array::CArray;
use crate::object::NativeObject;
use crate::scalar::Scalar;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

/* A member value as seen from Rust: a number, an array handle or an object handle */
#[derive(Clone)]
pub enum Value {
    Scalar(Scalar),
    Array(CArray),
    Object(Rc<dyn NativeObject>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Scalar(scalar) => Some(*scalar),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&CArray> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<dyn NativeObject>> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(scalar) => write!(f, "Scalar({scalar:?})"),
            Value::Array(array) => write!(f, "{array:?}"),
            Value::Object(object) => write!(f, "Object({})", object.layout_tag()),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

impl From<CArray> for Value {
    fn from(array: CArray) -> Self {
        Value::Array(array)
    }
}

impl From<Rc<dyn NativeObject>> for Value {
    fn from(object: Rc<dyn NativeObject>) -> Self {
        Value::Object(object)
    }
}

macro_rules! value_from_number {
    ($($source:ty),*) => {
        $(impl From<$source> for Value {
            fn from(value: $source) -> Self {
                Value::Scalar(Scalar::from(value))
            }
        })*
    };
}

value_from_number!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/* How an assignment treats existing storage */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InPlace {
    /* Copy values into storage, reallocating when shapes change */
    #[default]
    No,
    /* Adopt supplied arrays and resize in place; fail when that is impossible */
    Yes,
    /* Like `Yes`, but fall back to copying */
    OrCopy,
}

/// Constructor keyword arguments.
#[derive(Clone, Default)]
pub struct Overrides {
    pub(crate) values: IndexMap<String, Value>,
    pub(crate) subsets: IndexMap<String, bool>,
    pub(crate) in_place: InPlace,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Overrides the default of one subset flag for this instance only.
    pub fn subset(mut self, name: impl Into<String>, on: bool) -> Self {
        self.subsets.insert(name.into(), on);
        self
    }

    pub fn in_place(mut self, mode: InPlace) -> Self {
        self.in_place = mode;
        self
    }
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overrides")
            .field("values", &self.values)
            .field("subsets", &self.subsets)
            .field("in_place", &self.in_place)
            .finish()
    }
}
