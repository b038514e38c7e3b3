use crate::class::ClassMetadata;
use serde_derive::Serialize;
use simbind_types::{CType, MemberDecl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberCategory {
  Count,
  Scalar,
  Array,
  Object,
}

impl MemberCategory {
  pub fn of(member: &MemberDecl) -> Self {
    if member.is_count() {
      MemberCategory::Count
    } else if member.is_array() {
      MemberCategory::Array
    } else if member.is_object() {
      MemberCategory::Object
    } else {
      MemberCategory::Scalar
    }
  }
}

/// Conjunction of optional predicates on members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberFilter {
  pub ctype: Option<CType>,
  pub ndim: Option<usize>,
  pub category: Option<MemberCategory>,
}

impl MemberFilter {
  pub fn ctype(mut self, ctype: CType) -> Self {
    self.ctype = Some(ctype);
    self
  }

  pub fn ndim(mut self, ndim: usize) -> Self {
    self.ndim = Some(ndim);
    self
  }

  pub fn category(mut self, category: MemberCategory) -> Self {
    self.category = Some(category);
    self
  }

  pub fn matches(&self, member: &MemberDecl) -> bool {
    self.ctype.map_or(true, |ctype| member.ctype == Some(ctype))
      && self.ndim.map_or(true, |ndim| member.ndim() == ndim)
      && self.category.map_or(true, |category| MemberCategory::of(member) == category)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemberSummary {
  pub name: String,
  pub declaration: String,
  pub category: MemberCategory,
  pub indices: Vec<String>,
}

impl ClassMetadata {
  pub fn member_names(&self, filter: &MemberFilter) -> Vec<&str> {
    self.members.iter().filter(|m| filter.matches(m)).map(|m| m.name.as_str()).collect()
  }

  pub fn index_names(&self) -> Vec<&str> {
    self.indices.keys().map(String::as_str).collect()
  }

  /// Members grouped with the indices they depend on, for reporting.
  pub fn member_summaries(&self) -> Vec<MemberSummary> {
    self
      .members
      .iter()
      .map(|m| MemberSummary {
        name: m.name.clone(),
        declaration: m.to_string(),
        category: MemberCategory::of(m),
        indices: m.index_names().map(str::to_string).collect(),
      })
      .collect()
  }
}
