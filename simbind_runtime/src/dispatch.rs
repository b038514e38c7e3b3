use crate::class::CallOutcome;
use crate::errors::{BindError, BindResult, IndexBound};
use crate::instance::Instance;
use crate::scalar::{ConversionError, Scalar};
use indexmap::IndexMap;
use simbind_gen::ArgBinding;
use simbind_types::{CType, DefaultExpr};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// An argument passed to a generated method.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Scalar(Scalar),
    /// Selects one choice of a `{key | ...}` group.
    Choice(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Scalar(scalar) => write!(f, "{scalar}"),
            ArgValue::Choice(choice) => f.write_str(choice),
        }
    }
}

impl From<Scalar> for ArgValue {
    fn from(scalar: Scalar) -> Self {
        ArgValue::Scalar(scalar)
    }
}

impl From<&str> for ArgValue {
    fn from(choice: &str) -> Self {
        ArgValue::Choice(choice.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(choice: String) -> Self {
        ArgValue::Choice(choice)
    }
}

macro_rules! arg_from_number {
    ($($source:ty),*) => {
        $(impl From<$source> for ArgValue {
            fn from(value: $source) -> Self {
                ArgValue::Scalar(Scalar::from(value))
            }
        })*
    };
}

arg_from_number!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// Positional and named arguments of one method call.
///
/// Positional values fill the declared arguments first, then the choice
/// keys, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<ArgValue>,
    named: IndexMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn named_args(&self) -> &IndexMap<String, ArgValue> {
        &self.named
    }

    /// Inserts or replaces a named argument; lets wrappers adjust a call.
    pub fn set_named(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.named.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Instance {
    /// Calls a method by its base name, going through a registered wrapper
    /// when there is one.
    pub fn call(&mut self, function: &str, args: CallArgs) -> CallOutcome {
        let class = Arc::clone(self.class());
        match class.wrapper(function) {
            Some(wrapper) => {
                trace!(function, "calling through wrapper");
                wrapper(self, args, &|instance: &mut Instance, args: CallArgs| instance.call_generated(function, args))
            }
            None => self.call_generated(function, args),
        }
    }

    /// The generated method: binds arguments, picks the concrete function
    /// from the choice values, checks subsets and index bounds, then calls
    /// native code and maps its return code.
    pub fn call_generated(&mut self, function: &str, args: CallArgs) -> CallOutcome {
        let class = Arc::clone(self.class());
        let meta = class.metadata();
        let compiled = meta.function(function).ok_or_else(|| BindError::UnknownFunction {
            name: function.to_string(),
            class: meta.name.clone(),
        })?;
        let decl = &compiled.decl;
        let params = decl.param_names();

        if args.positional.len() > params.len() {
            return Err(BindError::TooManyArguments {
                function: function.to_string(),
                expected: params.len(),
                given: args.positional.len(),
            });
        }

        let mut bound: IndexMap<&str, ArgValue> = IndexMap::new();
        for (param, value) in params.iter().zip(args.positional) {
            bound.insert(*param, value);
        }
        let mut duplicates = Vec::new();
        let mut unknown = Vec::new();
        for (name, value) in args.named {
            match params.iter().find(|param| **param == name) {
                None => unknown.push(name),
                Some(param) if bound.contains_key(param) => duplicates.push(name),
                Some(param) => {
                    bound.insert(*param, value);
                }
            }
        }
        if !duplicates.is_empty() {
            return Err(BindError::MultipleValues { function: function.to_string(), names: duplicates });
        }
        if !unknown.is_empty() {
            return Err(BindError::UnrecognizedArgument { names: unknown });
        }

        let mut choices = Vec::with_capacity(decl.groups.len());
        for group in &decl.groups {
            let choice = match bound.get(group.key.as_str()) {
                None => group.choices.first().cloned().ok_or_else(|| BindError::MissingArgument {
                    function: function.to_string(),
                    argument: group.key.clone(),
                })?,
                Some(ArgValue::Choice(choice)) if group.choices.contains(choice) => choice.clone(),
                Some(other) => {
                    return Err(BindError::InvalidChoice {
                        function: function.to_string(),
                        key: group.key.clone(),
                        value: other.to_string(),
                        choices: group.choices.clone(),
                    })
                }
            };
            choices.push(choice);
        }
        let concrete = decl.namer.name(&choices).ok_or_else(|| BindError::UnknownFunction {
            name: function.to_string(),
            class: meta.name.clone(),
        })?;

        if !self.subset_flags().is_function_callable(&concrete) {
            return Err(BindError::InactiveFunction { symbol: concrete, flags: self.subset_flags().snapshot() });
        }

        let mut values = Vec::with_capacity(decl.args.len());
        for (arg, binding) in decl.args.iter().zip(&compiled.bindings) {
            let value = match bound.get(arg.name.as_str()) {
                Some(ArgValue::Scalar(scalar)) => *scalar,
                Some(ArgValue::Choice(_)) => {
                    return Err(BindError::TypeMismatch { name: arg.name.clone(), expected: "a number", found: "text" })
                }
                None => match &arg.default {
                    Some(DefaultExpr::Literal(literal)) => Scalar::from(*literal),
                    Some(DefaultExpr::Name(member)) => self.scalar(member)?,
                    None => {
                        return Err(BindError::MissingArgument {
                            function: function.to_string(),
                            argument: arg.name.clone(),
                        })
                    }
                },
            };
            if let ArgBinding::Index { index, upper_bound } = binding {
                self.check_index_argument(index, &arg.name, value, *upper_bound)?;
            }
            let native = value
                .convert(binding.native_type())
                .map_err(|source| BindError::Conversion { name: arg.name.clone(), source })?;
            values.push(native);
        }

        let native = class.native(&concrete).ok_or_else(|| BindError::UnknownFunction {
            name: concrete.clone(),
            class: meta.name.clone(),
        })?;
        trace!(function, %concrete, args = ?values, "calling native function");
        let code = self.invoke_native(native, &values)?;

        if code == 0 {
            return match &decl.returns {
                Some(member) => Ok(Some(self.get(member)?)),
                None => Ok(None),
            };
        }
        debug!(symbol = %native.symbol, code, "native function reported an error");
        match meta.error_template(code) {
            Some(template) => Err(BindError::Native {
                kind: template.kind.clone(),
                message: template.render(code, &concrete),
                code,
                symbol: concrete,
            }),
            None => Err(BindError::NativeCallFailure { symbol: concrete, code }),
        }
    }

    /* `i` accepts [0, num_i); `i<` accepts [1, num_i] */
    fn check_index_argument(&self, index: &str, argument: &str, value: Scalar, upper_bound: bool) -> BindResult<()> {
        let value = value.as_i64().ok_or_else(|| BindError::Conversion {
            name: argument.to_string(),
            source: ConversionError::FloatToInteger { value: value.as_f64(), ctype: CType::Int },
        })?;
        let size = self.num(index)? as i64;
        let (lower, upper, upper_expr) = if upper_bound {
            (1, size + 1, format!("num_{index}+1"))
        } else {
            (0, size, format!("num_{index}"))
        };
        if value < lower {
            return Err(BindError::IndexRange {
                index: index.to_string(),
                argument: argument.to_string(),
                value,
                bound: IndexBound::Lower,
                bound_expr: lower.to_string(),
                bound_value: lower,
            });
        }
        if value >= upper {
            return Err(BindError::IndexRange {
                index: index.to_string(),
                argument: argument.to_string(),
                value,
                bound: IndexBound::Upper,
                bound_expr: upper_expr,
                bound_value: upper,
            });
        }
        Ok(())
    }
}
