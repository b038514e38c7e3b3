use crate::array::ArrayError;
use crate::scalar::ConversionError;
use indexmap::IndexMap;
use simbind_gen::CompileError;
use std::fmt;
use thiserror::Error;

/// Result alias used across the runtime crate.
pub type BindResult<T> = Result<T, BindError>;

/// Errors raised while constructing, mutating or calling into an instance.
#[derive(Debug, Error)]
pub enum BindError {
    /// The class spec failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Array storage rejected an access or allocation.
    #[error(transparent)]
    Array(#[from] ArrayError),

    /// The shared library could not be opened.
    #[error("failed to load library '{library}': {reason}")]
    Library { library: String, reason: String },

    /// Functions are declared but no library or symbol table was given.
    #[error("class '{class}' declares functions but has no symbol source")]
    NoSymbolSource { class: String },

    /// Exported symbols expected by the class are absent.
    #[error("class '{class}' is missing native symbols: {}", .symbols.join(", "))]
    MissingSymbols { class: String, symbols: Vec<String> },

    /// A wrapper was registered for a function the class does not declare.
    #[error("cannot wrap unknown function '{function}'")]
    UnknownWrapper { function: String },

    /// Size variables had neither a default nor a constructor value.
    #[error("no size given for: {}", .indices.join(", "))]
    MissingSize { indices: Vec<String> },

    /// Keyword arguments that match no member, alias, index or subset.
    #[error("unrecognized arguments: {}", .names.join(", "))]
    UnrecognizedArgument { names: Vec<String> },

    /// Supplied arrays disagree on the extent of an index.
    #[error("{0}")]
    ShapeConsistency(ShapeReport),

    /// Index argument outside its valid range.
    #[error("{}", render_index_range(.index, .argument, .value, .bound, .bound_expr, .bound_value))]
    IndexRange {
        index: String,
        argument: String,
        value: i64,
        bound: IndexBound,
        bound_expr: String,
        bound_value: i64,
    },

    /// The concrete function belongs to a subset that is switched off.
    #[error("native function '{symbol}' cannot be called with subset flags {}", render_flags(.flags))]
    InactiveFunction {
        symbol: String,
        flags: IndexMap<String, bool>,
    },

    /// Non-zero return code mapped through the class error table.
    #[error("{kind}: {message}")]
    Native {
        kind: String,
        message: String,
        code: i32,
        symbol: String,
    },

    /// Non-zero return code with no error table entry.
    #[error("native function '{symbol}' terminated with code {code}")]
    NativeCallFailure { symbol: String, code: i32 },

    /// An in-place resize was required but the storage is shared.
    #[error("cannot resize '{member}' in place: storage has {references} references")]
    ResizeConflict { member: String, references: usize },

    /// The member's subsets are all off, so it has no storage.
    #[error("member '{member}' is not allocated")]
    NotAllocated { member: String },

    #[error("'{name}' is not a member of class '{class}'")]
    UnknownMember { name: String, class: String },

    #[error("unknown index names: {}; valid names are: {}", .names.join(", "), .valid.join(", "))]
    UnknownIndex { names: Vec<String>, valid: Vec<String> },

    #[error("unknown subsets: {}", .names.join(", "))]
    UnknownSubset { names: Vec<String> },

    #[error("'{name}' is not a function of class '{class}'")]
    UnknownFunction { name: String, class: String },

    #[error("{function}() takes at most {expected} arguments ({given} given)")]
    TooManyArguments {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("{function}() got multiple values for: {}", .names.join(", "))]
    MultipleValues { function: String, names: Vec<String> },

    #[error("{function}() missing value for argument '{argument}'")]
    MissingArgument { function: String, argument: String },

    #[error("{function}() got '{value}' for '{key}'; expected one of: {}", .choices.join(", "))]
    InvalidChoice {
        function: String,
        key: String,
        value: String,
        choices: Vec<String>,
    },

    /// A value of the wrong shape of thing was given (e.g. text for a number).
    #[error("'{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'{name}': {source}")]
    Conversion {
        name: String,
        #[source]
        source: ConversionError,
    },

    #[error("object member '{member}' expects tag '{expected}', got '{found}'")]
    ObjectTagMismatch {
        member: String,
        expected: String,
        found: String,
    },

    /// In-place assignment could not adopt the supplied array.
    #[error("cannot adopt array for '{member}' in place: {reason}")]
    InPlaceMismatch { member: String, reason: String },

    /// Array storage is borrowed elsewhere while native code needs it.
    #[error("array '{member}' is borrowed and cannot be handed to native code")]
    ArrayBorrowed { member: String },

    /// Snapshot serialization failed.
    #[error("state serialization failed: {0}")]
    State(#[from] serde_json::Error),

    #[error("failed to access state file {path}: {reason}")]
    StateIo { path: String, reason: String },

    /// A snapshot was restored into a different class.
    #[error("state was taken from class '{found}', not '{expected}'")]
    StateClassMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBound {
    Lower,
    Upper,
}

fn render_index_range(
    index: &str,
    argument: &str,
    value: &i64,
    bound: &IndexBound,
    bound_expr: &str,
    bound_value: &i64,
) -> String {
    match bound {
        IndexBound::Lower => format!(
            "index {index} cannot be less than {bound_expr} where value is {argument}={value}"
        ),
        IndexBound::Upper => format!(
            "index {index} cannot be larger than or equal to {bound_expr}={bound_value} where value is {argument}={value}"
        ),
    }
}

pub(crate) fn render_flags(flags: &IndexMap<String, bool>) -> String {
    let parts: Vec<String> = flags.iter().map(|(name, on)| format!("{name}: {on}")).collect();
    format!("{{{}}}", parts.join(", "))
}

/// What an extent constraint is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AxisKey {
    Index(String),
    Fixed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentSource {
    /// Array passed in the same assignment.
    Supplied,
    /// Array already held by the instance.
    Stored,
    /// Explicit `num_<index>` value in the same assignment.
    Requested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeContributor {
    pub member: String,
    pub axis: usize,
    pub extent: usize,
    pub source: ExtentSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeConflict {
    pub axis: AxisKey,
    pub contributors: Vec<ShapeContributor>,
}

/// Every inconsistent index found in one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShapeReport {
    pub conflicts: Vec<ShapeConflict>,
}

impl ShapeReport {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

impl fmt::Display for ShapeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "inconsistent array shapes:")?;
        for conflict in &self.conflicts {
            match &conflict.axis {
                AxisKey::Index(index) => writeln!(f, "  num_{index} is specified inconsistently:")?,
                AxisKey::Fixed(n) => writeln!(f, "  shape does not match fixed extent {n}:")?,
            }
            for c in &conflict.contributors {
                match c.source {
                    ExtentSource::Supplied => {
                        writeln!(f, "    {}.shape[{}] = {} (supplied)", c.member, c.axis, c.extent)?
                    }
                    ExtentSource::Stored => {
                        writeln!(f, "    self.{}.shape[{}] = {} (stored)", c.member, c.axis, c.extent)?
                    }
                    ExtentSource::Requested => writeln!(f, "    {} = {} (requested)", c.member, c.extent)?,
                }
            }
        }
        Ok(())
    }
}
