//! Declaration types for simulation class bindings.
//!
//! Pure data: primitive C types, parsed member and function declarations,
//! subset definitions and the class spec file model. No layout or native
//! code lives here.

pub mod ctype;
pub mod decl;
pub mod parse;
pub mod spec;

pub use ctype::*;
pub use decl::*;
pub use parse::{
    declare_members, expand_braces, is_identifier, parse_function, parse_literal, parse_member,
    DeclarationError, DeclarationKind,
};
pub use spec::*;
