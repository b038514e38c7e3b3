use crate::errors::{CompileDiagnostic, CompileError};
use crate::layout::StructLayout;
use crate::subsets::SubsetRegistry;
use indexmap::{IndexMap, IndexSet};
use serde_derive::Serialize;
use simbind_types::{
  is_identifier, parse_function, parse_member, ArgType, ClassSpec, CType, DeclarationError, DeclarationKind, DefaultExpr,
  ErrorTemplate, Extent, FunctionDecl, LibrarySpec, Literal, MemberDecl, MemberEntry, COUNT_PREFIX,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// An index variable and the array axes it sizes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexVariable {
  pub name: String,
  pub count_member: String,
  pub default: Option<usize>,
  /* (member, axis) pairs */
  pub users: Vec<(String, usize)>,
}

/// How one declared argument is marshalled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgBinding {
  Primitive(CType),
  /* Always passed as `int`; range checked against `num_<index>` */
  Index { index: String, upper_bound: bool },
}

impl ArgBinding {
  pub fn native_type(&self) -> CType {
    match self {
      ArgBinding::Primitive(ctype) => *ctype,
      ArgBinding::Index { .. } => CType::Int,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
  pub decl: FunctionDecl,
  /* One per declared argument, same order */
  pub bindings: Vec<ArgBinding>,
  /* Concrete name -> choices producing it */
  pub symbols: IndexMap<String, Vec<String>>,
}

impl CompiledFunction {
  pub fn name(&self) -> &str {
    &self.decl.base_name
  }

  pub fn native_types(&self) -> Vec<CType> {
    self.bindings.iter().map(ArgBinding::native_type).collect()
  }
}

/// Immutable, shareable description of a compiled class.
#[derive(Debug, Clone)]
pub struct ClassMetadata {
  pub name: String,
  pub func_prefix: String,
  pub members: Vec<MemberDecl>,
  member_index: HashMap<String, usize>,
  pub indices: IndexMap<String, IndexVariable>,
  pub functions: IndexMap<String, CompiledFunction>,
  pub layout: StructLayout,
  pub subsets: Arc<SubsetRegistry>,
  pub errors: BTreeMap<i32, ErrorTemplate>,
  pub library: Option<LibrarySpec>,
}

impl ClassMetadata {
  pub fn member(&self, name: &str) -> Option<&MemberDecl> {
    self.member_index.get(name).map(|&pos| &self.members[pos])
  }

  pub fn index(&self, name: &str) -> Option<&IndexVariable> {
    self.indices.get(name)
  }

  pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
    self.functions.get(name)
  }

  pub fn count_member_name(index: &str) -> String {
    format!("{COUNT_PREFIX}{index}")
  }

  /// Exported symbol for a concrete function name.
  pub fn native_symbol(&self, concrete: &str) -> String {
    format!("{}{}", self.func_prefix, concrete)
  }

  /// (concrete name, exported symbol) for every callable combination.
  pub fn symbols(&self) -> Vec<(String, String)> {
    self
      .functions
      .values()
      .flat_map(|f| f.symbols.keys())
      .map(|concrete| (concrete.clone(), self.native_symbol(concrete)))
      .collect()
  }

  pub fn error_template(&self, code: i32) -> Option<&ErrorTemplate> {
    self.errors.get(&code)
  }

  pub fn array_members(&self) -> impl Iterator<Item = &MemberDecl> {
    self.members.iter().filter(|m| m.is_array())
  }

  /// Resolves `<member>_<i>[_<j>...]` to an array member and element index.
  /// The longest matching member name wins; the index count must equal ndim.
  pub fn element_alias(&self, key: &str) -> Option<(&MemberDecl, Vec<usize>)> {
    let mut best: Option<(&MemberDecl, Vec<usize>)> = None;
    for member in self.array_members() {
      let Some(rest) = key.strip_prefix(member.name.as_str()).and_then(|r| r.strip_prefix('_')) else {
        continue;
      };
      let parsed: Option<Vec<usize>> = rest
        .split('_')
        .map(|part| if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) { part.parse().ok() } else { None })
        .collect();
      let Some(index) = parsed else { continue };
      if index.len() != member.ndim() {
        continue;
      }
      if best.as_ref().map_or(true, |(b, _)| member.name.len() > b.name.len()) {
        best = Some((member, index));
      }
    }
    best
  }
}

/// Parses and cross-checks a class spec. Every problem found is reported.
pub fn compile_class_spec(spec: &ClassSpec) -> Result<ClassMetadata, CompileError> {
  let mut diagnostics: Vec<CompileDiagnostic> = Vec::new();

  if !is_identifier(&spec.name) {
    diagnostics.push(CompileDiagnostic::InvalidClassName(spec.name.clone()));
  }

  let mut members = Vec::with_capacity(spec.members.len());
  for entry in &spec.members {
    match entry {
      MemberEntry::Declaration(text) => match parse_member(text) {
        Ok(member) => members.push(member),
        Err(err) => diagnostics.push(err.into()),
      },
      MemberEntry::Object { object, tag } => {
        if is_identifier(object) {
          members.push(MemberDecl::object(object.as_str(), tag.as_str()));
        } else {
          diagnostics.push(
            DeclarationError {
              kind: DeclarationKind::Member,
              declaration: object.clone(),
              fragment: object.clone(),
              reason: "object member name must be an identifier".to_string(),
            }
            .into(),
          );
        }
      }
    }
  }

  let mut member_index = HashMap::with_capacity(members.len());
  for (pos, member) in members.iter().enumerate() {
    if member_index.insert(member.name.clone(), pos).is_some() {
      diagnostics.push(CompileDiagnostic::DuplicateMember(member.name.clone()));
    }
  }

  let mut indices: IndexMap<String, IndexVariable> = IndexMap::new();
  for member in &members {
    if let Some(index) = member.count_index() {
      let default = match member.default {
        Some(Literal::Int(n)) => Some(n as usize),
        _ => None,
      };
      indices.insert(
        index.to_string(),
        IndexVariable { name: index.to_string(), count_member: member.name.clone(), default, users: Vec::new() },
      );
    }
  }
  for member in &members {
    for (axis, extent) in member.extents().iter().enumerate() {
      if let Extent::Index(index) = extent {
        match indices.get_mut(index) {
          Some(var) => var.users.push((member.name.clone(), axis)),
          None => diagnostics.push(CompileDiagnostic::UndeclaredIndex { member: member.name.clone(), index: index.clone() }),
        }
      }
    }
  }

  let is_scalar_member = |name: &str| member_index.get(name).map_or(false, |&pos| members[pos].is_scalar());

  let mut functions: IndexMap<String, CompiledFunction> = IndexMap::new();
  let mut symbol_owner: HashMap<String, String> = HashMap::new();
  for text in &spec.functions {
    let decl = match parse_function(text) {
      Ok(decl) => decl,
      Err(err) => {
        diagnostics.push(err.into());
        continue;
      }
    };
    if functions.contains_key(&decl.base_name) {
      diagnostics.push(CompileDiagnostic::DuplicateFunction(decl.base_name.clone()));
      continue;
    }
    if let Some(returns) = &decl.returns {
      if !is_scalar_member(returns) {
        diagnostics.push(CompileDiagnostic::InvalidReturnMember { function: decl.base_name.clone(), member: returns.clone() });
      }
    }

    let mut bindings = Vec::with_capacity(decl.args.len());
    for arg in &decl.args {
      let binding = match &arg.arg_type {
        ArgType::Primitive(ctype) => Some(ArgBinding::Primitive(*ctype)),
        ArgType::Index(index) if indices.contains_key(index) => {
          Some(ArgBinding::Index { index: index.clone(), upper_bound: arg.upper_bound })
        }
        ArgType::Index(type_name) => {
          diagnostics.push(CompileDiagnostic::UnknownArgumentType {
            function: decl.base_name.clone(),
            argument: arg.name.clone(),
            type_name: type_name.clone(),
          });
          None
        }
        /* An untyped argument named after an index is a plain int */
        ArgType::Untyped if indices.contains_key(&arg.name) => Some(ArgBinding::Primitive(CType::Int)),
        ArgType::Untyped => {
          diagnostics
            .push(CompileDiagnostic::UntypedArgument { function: decl.base_name.clone(), argument: arg.name.clone() });
          None
        }
      };
      if let Some(DefaultExpr::Name(name)) = &arg.default {
        if !is_scalar_member(name) {
          diagnostics.push(CompileDiagnostic::UnknownDefaultName {
            function: decl.base_name.clone(),
            argument: arg.name.clone(),
            name: name.clone(),
          });
        }
      }
      bindings.extend(binding);
    }

    let mut symbols = IndexMap::new();
    for (concrete, choices) in decl.concrete_names() {
      match symbol_owner.get(&concrete) {
        Some(first) => diagnostics.push(CompileDiagnostic::SymbolCollision {
          symbol: concrete.clone(),
          first: first.clone(),
          second: decl.base_name.clone(),
        }),
        None => {
          symbol_owner.insert(concrete.clone(), decl.base_name.clone());
        }
      }
      symbols.insert(concrete, choices);
    }
    functions.insert(decl.base_name.clone(), CompiledFunction { decl, bindings, symbols });
  }

  let subset_members: IndexSet<String> =
    members.iter().filter(|m| m.is_array() || m.is_object()).map(|m| m.name.clone()).collect();
  let concrete_names: IndexSet<String> = functions.values().flat_map(|f| f.symbols.keys().cloned()).collect();
  let subsets = match SubsetRegistry::register(&spec.subsets, &subset_members, &concrete_names) {
    Ok(registry) => registry,
    Err(err) => {
      diagnostics.push(err.into());
      SubsetRegistry::default()
    }
  };

  if !diagnostics.is_empty() {
    return Err(CompileError { class: spec.name.clone(), diagnostics });
  }

  let layout = StructLayout::build(&spec.name, &members);
  debug!(
    class = %spec.name,
    members = members.len(),
    functions = functions.len(),
    symbols = concrete_names.len(),
    size = layout.size,
    "compiled class spec"
  );

  Ok(ClassMetadata {
    name: spec.name.clone(),
    func_prefix: spec.effective_func_prefix(),
    members,
    member_index,
    indices,
    functions,
    layout,
    subsets: Arc::new(subsets),
    errors: spec.errors.clone(),
    library: spec.library.clone(),
  })
}
