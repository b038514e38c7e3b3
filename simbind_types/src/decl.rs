use crate::ctype::CType;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Members named `num_<index>` declare the size variable for `<index>`.
pub const COUNT_PREFIX: &str = "num_";

/// Literal written after `=` in a declaration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Literal {
    /// Whether the literal can be stored in `ctype` without losing its meaning.
    pub fn fits(self, ctype: CType) -> bool {
        match self {
            Literal::Int(value) => match ctype.integer_range() {
                Some((lo, hi)) => (lo..=hi).contains(&(value as i128)),
                None => true,
            },
            Literal::Float(_) => ctype.is_float(),
            Literal::Bool(_) => ctype == CType::Bool,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Int(value) => write!(f, "{value}"),
            Literal::Float(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
        }
    }
}

/// One dimension of an array member.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum Extent {
    /// Sized by the index variable `num_<name>`.
    Index(String),
    /// Literal extent, never resized.
    Fixed(usize),
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Index(name) => f.write_str(name),
            Extent::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// How a multi-dimensional array is exposed to native code.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum ArrayLayout {
    /// `T**` chain of row pointers over one contiguous block (`a[i][j]`).
    Iliffe,
    /// Plain `T*` to the contiguous block (`a[i,j]`).
    Flat,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum MemberKind {
    Scalar,
    Array {
        extents: Vec<Extent>,
        layout: ArrayLayout,
    },
    /// Opaque handle to another native object, stored as a pointer.
    Object { tag: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct MemberDecl {
    pub name: String,
    /// `None` only for object members.
    pub ctype: Option<CType>,
    pub kind: MemberKind,
    #[serde(default)]
    pub default: Option<Literal>,
}

impl MemberDecl {
    pub fn object(name: impl Into<String>, tag: impl Into<String>) -> Self {
        MemberDecl {
            name: name.into(),
            ctype: None,
            kind: MemberKind::Object { tag: tag.into() },
            default: None,
        }
    }

    /// The index this member sizes, when it is a `num_` member.
    pub fn count_index(&self) -> Option<&str> {
        match self.kind {
            MemberKind::Scalar => self
                .name
                .strip_prefix(COUNT_PREFIX)
                .filter(|index| !index.is_empty()),
            _ => None,
        }
    }

    pub fn is_count(&self) -> bool {
        self.count_index().is_some()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, MemberKind::Scalar)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, MemberKind::Array { .. })
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, MemberKind::Object { .. })
    }

    pub fn ndim(&self) -> usize {
        match &self.kind {
            MemberKind::Array { extents, .. } => extents.len(),
            _ => 0,
        }
    }

    pub fn extents(&self) -> &[Extent] {
        match &self.kind {
            MemberKind::Array { extents, .. } => extents,
            _ => &[],
        }
    }

    pub fn layout(&self) -> Option<ArrayLayout> {
        match &self.kind {
            MemberKind::Array { layout, .. } => Some(*layout),
            _ => None,
        }
    }

    /// Symbolic index names in dimension order.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.extents().iter().filter_map(|extent| match extent {
            Extent::Index(name) => Some(name.as_str()),
            Extent::Fixed(_) => None,
        })
    }

    pub fn uses_index(&self, index: &str) -> bool {
        self.index_names().any(|name| name == index)
    }

    pub fn object_tag(&self) -> Option<&str> {
        match &self.kind {
            MemberKind::Object { tag } => Some(tag),
            _ => None,
        }
    }
}

/// Canonical declaration text; parsing it yields an equal declaration.
impl fmt::Display for MemberDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, self.ctype) {
            (MemberKind::Object { tag }, _) => write!(f, "{tag} {}", self.name)?,
            (_, Some(ctype)) => write!(f, "{ctype} {}", self.name)?,
            (_, None) => f.write_str(&self.name)?,
        }
        if let MemberKind::Array { extents, layout } = &self.kind {
            match layout {
                ArrayLayout::Iliffe => {
                    for extent in extents {
                        write!(f, "[{extent}]")?;
                    }
                }
                ArrayLayout::Flat => {
                    let joined: Vec<String> = extents.iter().map(|e| e.to_string()).collect();
                    write!(f, "[{}]", joined.join(","))?;
                }
            }
        }
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

/// `{key | a, b, c}` inside a function name.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ChoiceGroup {
    pub key: String,
    pub choices: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum ArgType {
    Primitive(CType),
    /// Named after an index; checked against `num_<index>` at call time.
    Index(String),
    Untyped,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultExpr {
    Literal(Literal),
    /// Scalar member of the instance, read when the call is made.
    Name(String),
}

impl fmt::Display for DefaultExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultExpr::Literal(literal) => write!(f, "{literal}"),
            DefaultExpr::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ArgDecl {
    pub name: String,
    pub arg_type: ArgType,
    /// `i< name`: the argument may equal `num_i` (exclusive upper bound).
    #[serde(default)]
    pub upper_bound: bool,
    #[serde(default)]
    pub default: Option<DefaultExpr>,
}

impl fmt::Display for ArgDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg_type {
            ArgType::Primitive(ctype) => write!(f, "{ctype} ")?,
            ArgType::Index(index) if self.upper_bound => write!(f, "{index}< ")?,
            ArgType::Index(index) => write!(f, "{index} ")?,
            ArgType::Untyped => {}
        }
        f.write_str(&self.name)?;
        if let Some(default) = &self.default {
            write!(f, "={default}")?;
        }
        Ok(())
    }
}

/// Literal fragments of a function name around its choice groups.
///
/// A name with `n` groups has `n + 1` fragments; the concrete name for a
/// choice combination interleaves fragments and choices.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct SymbolNamer {
    fragments: Vec<String>,
}

impl SymbolNamer {
    pub fn new(fragments: Vec<String>) -> Self {
        SymbolNamer { fragments }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn name<S: AsRef<str>>(&self, choices: &[S]) -> Option<String> {
        if choices.len() + 1 != self.fragments.len() {
            return None;
        }
        let mut name = self.fragments[0].clone();
        for (choice, fragment) in choices.iter().zip(&self.fragments[1..]) {
            name.push_str(choice.as_ref());
            name.push_str(fragment);
        }
        Some(name)
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct FunctionDecl {
    /// Scalar member returned after a successful call.
    #[serde(default)]
    pub returns: Option<String>,
    pub base_name: String,
    pub groups: Vec<ChoiceGroup>,
    pub args: Vec<ArgDecl>,
    pub namer: SymbolNamer,
}

impl FunctionDecl {
    /// Every choice combination, first group varying slowest.
    pub fn combinations(&self) -> Vec<Vec<String>> {
        let mut combos: Vec<Vec<String>> = vec![Vec::new()];
        for group in &self.groups {
            let mut next = Vec::with_capacity(combos.len() * group.choices.len());
            for combo in &combos {
                for choice in &group.choices {
                    let mut extended = combo.clone();
                    extended.push(choice.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        combos
    }

    /// Concrete names paired with the choices that produce them.
    pub fn concrete_names(&self) -> Vec<(String, Vec<String>)> {
        self.combinations()
            .into_iter()
            .filter_map(|combo| self.namer.name(&combo).map(|name| (name, combo)))
            .collect()
    }

    /// Parameter order: declared arguments, then choice keys.
    pub fn param_names(&self) -> Vec<&str> {
        self.args
            .iter()
            .map(|arg| arg.name.as_str())
            .chain(self.groups.iter().map(|group| group.key.as_str()))
            .collect()
    }

    pub fn arg(&self, name: &str) -> Option<&ArgDecl> {
        self.args.iter().find(|arg| arg.name == name)
    }

    pub fn group(&self, key: &str) -> Option<&ChoiceGroup> {
        self.groups.iter().find(|group| group.key == key)
    }
}

impl fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(returns) = &self.returns {
            write!(f, "{returns} ")?;
        }
        let fragments = self.namer.fragments();
        f.write_str(&fragments[0])?;
        for (group, fragment) in self.groups.iter().zip(&fragments[1..]) {
            write!(f, "{{{} | {}}}{fragment}", group.key, group.choices.join(", "))?;
        }
        let args: Vec<String> = self.args.iter().map(|arg| arg.to_string()).collect();
        write!(f, "({})", args.join(", "))
    }
}

/// Named group of members and functions toggled together.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SubsetDef {
    #[serde(default)]
    pub members: Vec<String>,
    /// Concrete function names; brace patterns like `vec_{plus, minus}` allowed.
    #[serde(default)]
    pub funcs: Vec<String>,
    #[serde(default)]
    pub default: bool,
}

impl SubsetDef {
    pub fn new<M, F>(members: M, funcs: F, default: bool) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        SubsetDef {
            members: members.into_iter().map(Into::into).collect(),
            funcs: funcs.into_iter().map(Into::into).collect(),
            default,
        }
    }
}
