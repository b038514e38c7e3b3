use indexmap::{IndexMap, IndexSet};
use simbind_types::{expand_braces, DeclarationError, SubsetDef};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubsetError {
  #[error(transparent)]
  Pattern(#[from] DeclarationError),
  #[error("unknown names in subset definitions: {}", render_unknown(.0))]
  UnknownNames(Vec<UnknownSubsetName>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSubsetName {
  pub subset: String,
  pub name: String,
  pub is_function: bool,
}

fn render_unknown(names: &[UnknownSubsetName]) -> String {
  names
    .iter()
    .map(|n| format!("{} '{}' in subset '{}'", if n.is_function { "function" } else { "member" }, n.name, n.subset))
    .collect::<Vec<_>>()
    .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subset {
  pub name: String,
  pub members: IndexSet<String>,
  /* Expanded concrete function names */
  pub functions: IndexSet<String>,
  pub default: bool,
}

/// Class-level subset table; per-instance state lives in [`SubsetFlags`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubsetRegistry {
  subsets: Vec<Subset>,
}

impl SubsetRegistry {
  /// Expands function patterns and checks every name against the class.
  /// All unknown names are reported together.
  pub fn register(
    defs: &IndexMap<String, SubsetDef>,
    members: &IndexSet<String>,
    functions: &IndexSet<String>,
  ) -> Result<Self, SubsetError> {
    let mut subsets = Vec::with_capacity(defs.len());
    let mut unknown = Vec::new();

    for (name, def) in defs {
      let mut expanded = IndexSet::new();
      for pattern in &def.funcs {
        expanded.extend(expand_braces(pattern)?);
      }
      for member in &def.members {
        if !members.contains(member) {
          unknown.push(UnknownSubsetName { subset: name.clone(), name: member.clone(), is_function: false });
        }
      }
      for func in &expanded {
        if !functions.contains(func) {
          unknown.push(UnknownSubsetName { subset: name.clone(), name: func.clone(), is_function: true });
        }
      }
      subsets.push(Subset { name: name.clone(), members: def.members.iter().cloned().collect(), functions: expanded, default: def.default });
    }

    if !unknown.is_empty() {
      return Err(SubsetError::UnknownNames(unknown));
    }
    Ok(Self { subsets })
  }

  pub fn subsets(&self) -> &[Subset] {
    &self.subsets
  }

  pub fn get(&self, name: &str) -> Option<&Subset> {
    self.subsets.iter().find(|s| s.name == name)
  }

  pub fn is_empty(&self) -> bool {
    self.subsets.is_empty()
  }

  fn position(&self, name: &str) -> Option<usize> {
    self.subsets.iter().position(|s| s.name == name)
  }

  /// Fresh per-instance flags initialised from the defaults.
  pub fn defaults(self: &Arc<Self>) -> SubsetFlags {
    SubsetFlags { registry: Arc::clone(self), on: self.subsets.iter().map(|s| s.default).collect() }
  }
}

/// On/off state of every subset for one instance.
#[derive(Debug, Clone)]
pub struct SubsetFlags {
  registry: Arc<SubsetRegistry>,
  on: Vec<bool>,
}

impl SubsetFlags {
  pub fn get(&self, name: &str) -> Option<bool> {
    self.registry.position(name).map(|pos| self.on[pos])
  }

  /// Sets one flag; returns `false` when no subset has that name.
  pub fn set(&mut self, name: &str, value: bool) -> bool {
    match self.registry.position(name) {
      Some(pos) => {
        self.on[pos] = value;
        true
      }
      None => false,
    }
  }

  /// Applies all overrides or none; unknown names are returned.
  pub fn set_many<'a, I>(&mut self, values: I) -> Result<(), Vec<String>>
  where
    I: IntoIterator<Item = (&'a str, bool)>,
  {
    let values: Vec<(&str, bool)> = values.into_iter().collect();
    let unknown: Vec<String> =
      values.iter().filter(|(name, _)| self.registry.position(name).is_none()).map(|(name, _)| name.to_string()).collect();
    if !unknown.is_empty() {
      return Err(unknown);
    }
    for (name, value) in values {
      self.set(name, value);
    }
    Ok(())
  }

  /// A concrete function is callable only when every subset containing it is on.
  pub fn is_function_callable(&self, symbol: &str) -> bool {
    self.registry.subsets.iter().zip(&self.on).all(|(subset, on)| *on || !subset.functions.contains(symbol))
  }

  /// A member needs storage when no subset lists it, or any subset listing it is on.
  pub fn is_member_allocation_needed(&self, member: &str) -> bool {
    let mut listed = false;
    for (subset, on) in self.registry.subsets.iter().zip(&self.on) {
      if subset.members.contains(member) {
        if *on {
          return true;
        }
        listed = true;
      }
    }
    !listed
  }

  pub fn snapshot(&self) -> IndexMap<String, bool> {
    self.registry.subsets.iter().zip(&self.on).map(|(s, on)| (s.name.clone(), *on)).collect()
  }

  pub fn registry(&self) -> &Arc<SubsetRegistry> {
    &self.registry
  }
}

impl fmt::Display for SubsetFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.snapshot().iter().map(|(name, on)| format!("{name}: {on}")).collect();
    write!(f, "{{{}}}", parts.join(", "))
  }
}
