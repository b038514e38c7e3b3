use crate::subsets::SubsetError;
use simbind_types::DeclarationError;
use thiserror::Error;

/// One problem found while compiling a class spec.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileDiagnostic {
  #[error(transparent)]
  Declaration(#[from] DeclarationError),

  #[error("member '{0}' is declared more than once")]
  DuplicateMember(String),

  #[error("member '{member}' uses index '{index}' but 'num_{index}' is not declared")]
  UndeclaredIndex { member: String, index: String },

  #[error("function '{0}' is declared more than once")]
  DuplicateFunction(String),

  #[error("symbol '{symbol}' is generated by both '{first}' and '{second}'")]
  SymbolCollision { symbol: String, first: String, second: String },

  #[error("function '{function}' returns '{member}', which is not a scalar member")]
  InvalidReturnMember { function: String, member: String },

  #[error("argument '{argument}' of '{function}' has unknown type '{type_name}'")]
  UnknownArgumentType { function: String, argument: String, type_name: String },

  #[error("argument '{argument}' of '{function}' has no type and does not name an index")]
  UntypedArgument { function: String, argument: String },

  #[error("default '{name}' of argument '{argument}' in '{function}' is not a scalar member")]
  UnknownDefaultName { function: String, argument: String, name: String },

  #[error("class name '{0}' is not an identifier")]
  InvalidClassName(String),

  #[error(transparent)]
  Subset(#[from] SubsetError),
}

/// All diagnostics for a class, reported together.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("class '{class}' has {} invalid declaration(s):\n{}", .diagnostics.len(), render(.diagnostics))]
pub struct CompileError {
  pub class: String,
  pub diagnostics: Vec<CompileDiagnostic>,
}

fn render(diagnostics: &[CompileDiagnostic]) -> String {
  diagnostics.iter().map(|d| format!("  - {d}")).collect::<Vec<_>>().join("\n")
}
