use serde_derive::Serialize;
use simbind_types::{CType, MemberDecl, MemberKind};
use std::mem::size_of;

const POINTER_SIZE: usize = size_of::<*const u8>();

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
  Scalar(CType),
  /* `depth` levels of indirection to `base` (1 for flat arrays, ndim for pointer chains) */
  Pointer { base: CType, depth: usize },
  /* Opaque `void*` handle to another object */
  Handle { tag: String },
}

impl FieldType {
  pub fn size(&self) -> usize {
    match self {
      FieldType::Scalar(ctype) => ctype.size(),
      FieldType::Pointer { .. } | FieldType::Handle { .. } => POINTER_SIZE,
    }
  }

  pub fn alignment(&self) -> usize {
    match self {
      FieldType::Scalar(ctype) => ctype.align(),
      FieldType::Pointer { .. } | FieldType::Handle { .. } => POINTER_SIZE,
    }
  }

  pub fn c_decl(&self, name: &str) -> String {
    match self {
      FieldType::Scalar(ctype) => format!("{} {}", ctype.c_name(), name),
      FieldType::Pointer { base, depth } => format!("{} {}{}", base.c_name(), "*".repeat(*depth), name),
      FieldType::Handle { .. } => format!("void *{}", name),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldLayout {
  pub name: String,
  pub field_type: FieldType,
  pub offset: usize,
  pub size: usize,
  pub alignment: usize,
}

/// Native struct for one class: members in declaration order, C alignment rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StructLayout {
  pub name: String,
  pub fields: Vec<FieldLayout>,
  pub size: usize,
  pub alignment: usize,
}

impl StructLayout {
  pub fn build(name: &str, members: &[MemberDecl]) -> Self {
    let mut fields = Vec::with_capacity(members.len());
    let mut current_offset = 0usize;
    let mut max_alignment = 1usize;

    for member in members {
      let field_type = field_type_of(member);
      let alignment = field_type.alignment();
      let size = field_type.size();
      current_offset = align_up(current_offset, alignment);
      fields.push(FieldLayout { name: member.name.clone(), field_type, offset: current_offset, size, alignment });
      current_offset += size;
      max_alignment = max_alignment.max(alignment);
    }

    Self { name: name.to_string(), fields, size: align_up(current_offset, max_alignment), alignment: max_alignment }
  }

  pub fn field(&self, name: &str) -> Option<&FieldLayout> {
    self.fields.iter().find(|field| field.name == name)
  }
}

fn field_type_of(member: &MemberDecl) -> FieldType {
  match (&member.kind, member.ctype) {
    (MemberKind::Object { tag }, _) => FieldType::Handle { tag: tag.clone() },
    (MemberKind::Array { extents, layout }, Some(base)) => {
      let depth = match layout {
        simbind_types::ArrayLayout::Iliffe => extents.len(),
        simbind_types::ArrayLayout::Flat => 1,
      };
      FieldType::Pointer { base, depth }
    }
    (MemberKind::Scalar, Some(ctype)) => FieldType::Scalar(ctype),
    /* Parsed declarations always carry a type; treat a missing one as an opaque pointer */
    (_, None) => FieldType::Handle { tag: String::new() },
  }
}

pub fn align_up(value: usize, alignment: usize) -> usize {
  (value + alignment - 1) & !(alignment - 1)
}
