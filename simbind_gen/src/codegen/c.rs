use crate::class::ClassMetadata;
use std::fmt::Write;

pub struct CHeaderOptions {
  /* Annotate each field with its byte offset */
  pub emit_offsets: bool,
  pub emit_include_guard: bool,
}

impl Default for CHeaderOptions {
  fn default() -> Self {
    Self { emit_offsets: true, emit_include_guard: true }
  }
}

/* Emits the struct definition and function prototypes native code must provide */
pub struct CHeaderGenerator<'a> {
  meta: &'a ClassMetadata,
  options: CHeaderOptions,
}

impl<'a> CHeaderGenerator<'a> {
  pub fn new(meta: &'a ClassMetadata, options: CHeaderOptions) -> Self {
    Self { meta, options }
  }

  pub fn emit(&self) -> String {
    let mut out = String::new();
    let name = &self.meta.name;
    let guard = format!("SIMBIND_{}_H", name.to_uppercase());

    writeln!(out, "/* Generated by simbind for class {}. Do not edit. */", name).unwrap();
    if self.options.emit_include_guard {
      writeln!(out, "#ifndef {}", guard).unwrap();
      writeln!(out, "#define {}", guard).unwrap();
    }
    writeln!(out).unwrap();
    writeln!(out, "#include <stdbool.h>").unwrap();
    writeln!(out, "#include <stddef.h>").unwrap();
    writeln!(out).unwrap();

    out.push_str(&self.emit_struct());
    writeln!(out).unwrap();
    out.push_str(&self.emit_prototypes());

    if self.options.emit_include_guard {
      writeln!(out).unwrap();
      writeln!(out, "#endif /* {} */", guard).unwrap();
    }
    out
  }

  fn emit_struct(&self) -> String {
    let mut out = String::new();
    let layout = &self.meta.layout;
    writeln!(out, "typedef struct {} {{", layout.name).unwrap();
    for field in &layout.fields {
      let decl = field.field_type.c_decl(&field.name);
      if self.options.emit_offsets {
        writeln!(out, "  {}; /* offset {} */", decl, field.offset).unwrap();
      } else {
        writeln!(out, "  {};", decl).unwrap();
      }
    }
    writeln!(out, "}} {};", layout.name).unwrap();
    if self.options.emit_offsets {
      writeln!(out, "/* sizeof({}) == {}, alignment {} */", layout.name, layout.size, layout.alignment).unwrap();
    }
    out
  }

  fn emit_prototypes(&self) -> String {
    let mut out = String::new();
    for function in self.meta.functions.values() {
      writeln!(out, "/* {} */", function.decl).unwrap();
      let mut params = vec![format!("{} *self", self.meta.name)];
      for (arg, binding) in function.decl.args.iter().zip(&function.bindings) {
        params.push(format!("{} {}", binding.native_type().c_name(), arg.name));
      }
      for concrete in function.symbols.keys() {
        writeln!(out, "int {}({});", self.meta.native_symbol(concrete), params.join(", ")).unwrap();
      }
    }
    out
  }
}
