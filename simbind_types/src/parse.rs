//! Parsers for the member and function declaration mini-languages.
//!
//! Member:   `[type] name[dims] [= default]`, dims either `[i][j]` (pointer chain)
//!           or `[i,j]` (flat), each dim an index name or a literal integer.
//! Function: `[ret] name_{key | a, b}_rest(args)`, args `[type[<]] name[=default]`.

use crate::ctype::CType;
use crate::decl::{
    ArgDecl, ArgType, ArrayLayout, ChoiceGroup, DefaultExpr, Extent, FunctionDecl, Literal,
    MemberDecl, MemberKind, SymbolNamer, COUNT_PREFIX,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Member,
    Function,
    Argument,
    Subset,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeclarationKind::Member => "member",
            DeclarationKind::Function => "function",
            DeclarationKind::Argument => "argument",
            DeclarationKind::Subset => "subset pattern",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind} declaration '{declaration}': {reason} (near '{fragment}')")]
pub struct DeclarationError {
    pub kind: DeclarationKind,
    pub declaration: String,
    pub fragment: String,
    pub reason: String,
}

impl DeclarationError {
    fn new(kind: DeclarationKind, declaration: &str, fragment: &str, reason: impl Into<String>) -> Self {
        DeclarationError {
            kind,
            declaration: declaration.to_string(),
            fragment: fragment.to_string(),
            reason: reason.into(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => chars.all(is_word_char),
        _ => false,
    }
}

/// Parses a literal default value. Returns `None` for anything that is not
/// a bool, an integer, or a plain decimal float.
pub fn parse_literal(text: &str) -> Option<Literal> {
    match text {
        "true" | "True" => return Some(Literal::Bool(true)),
        "false" | "False" => return Some(Literal::Bool(false)),
        _ => {}
    }
    if let Ok(value) = text.parse::<i64>() {
        return Some(Literal::Int(value));
    }
    let numeric = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if numeric && text.chars().any(|c| c.is_ascii_digit()) {
        return text.parse::<f64>().ok().map(Literal::Float);
    }
    None
}

pub fn parse_member(text: &str) -> Result<MemberDecl, DeclarationError> {
    let decl = text.trim();
    let err = |fragment: &str, reason: &str| {
        DeclarationError::new(DeclarationKind::Member, decl, fragment, reason)
    };

    let (head, default_text) = match decl.split_once('=') {
        Some((head, default)) => (head.trim_end(), Some(default.trim())),
        None => (decl, None),
    };
    let (names, dims_text) = match head.find('[') {
        Some(pos) => (head[..pos].trim_end(), Some(head[pos..].trim())),
        None => (head, None),
    };

    let tokens: Vec<&str> = names.split_whitespace().collect();
    let (type_token, name) = match tokens.as_slice() {
        [name] => (None, *name),
        [ty, name] => (Some(*ty), *name),
        _ => return Err(err(names, "expected '[type] name'")),
    };
    if !is_identifier(name) {
        return Err(err(name, "member name must be an identifier"));
    }

    let declared = match type_token {
        Some(token) => match CType::from_token(token) {
            Some(ctype) => Some(ctype),
            None => return Err(err(token, "unknown type")),
        },
        None => None,
    };

    let is_count = name.len() > COUNT_PREFIX.len() && name.starts_with(COUNT_PREFIX);
    let ctype = if is_count {
        match declared {
            None | Some(CType::Int) => CType::Int,
            Some(_) => return Err(err(names, "size variables must be of type int")),
        }
    } else {
        match declared {
            Some(ctype) => ctype,
            None => return Err(err(name, "missing base type")),
        }
    };

    let kind = match dims_text {
        None => MemberKind::Scalar,
        Some(_) if is_count => return Err(err(head, "size variables cannot be arrays")),
        Some(dims) => parse_dims(dims).map_err(|(fragment, reason)| err(fragment, reason))?,
    };

    let default = match default_text {
        None => None,
        Some("") => return Err(err(decl, "missing default value after '='")),
        Some(value) => {
            let literal = parse_literal(value).ok_or_else(|| err(value, "default must be a literal"))?;
            if !literal.fits(ctype) {
                return Err(err(value, &format!("default does not fit type {ctype}")));
            }
            if is_count && !matches!(literal, Literal::Int(n) if n >= 0) {
                return Err(err(value, "size default must be a non-negative integer"));
            }
            Some(literal)
        }
    };

    Ok(MemberDecl {
        name: name.to_string(),
        ctype: Some(ctype),
        kind,
        default,
    })
}

fn parse_dims(dims: &str) -> Result<MemberKind, (&str, &'static str)> {
    let mut groups = Vec::new();
    let mut rest = dims;
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return Err((rest, "expected '['"));
        };
        let Some(close) = inner.find(']') else {
            return Err((rest, "unclosed '['"));
        };
        groups.push(&inner[..close]);
        rest = inner[close + 1..].trim_start();
    }

    let layout = match groups.as_slice() {
        [single] if single.contains(',') => ArrayLayout::Flat,
        many if many.iter().any(|g| g.contains(',')) => {
            return Err((dims, "cannot mix '[i][j]' and '[i,j]' forms"));
        }
        _ => ArrayLayout::Iliffe,
    };

    let items: Vec<&str> = match layout {
        ArrayLayout::Flat => groups[0].split(',').collect(),
        ArrayLayout::Iliffe => groups,
    };
    let mut extents = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            return Err((dims, "empty dimension"));
        }
        if item.chars().all(|c| c.is_ascii_digit()) {
            let n = item.parse::<usize>().map_err(|_| (item, "dimension is too large"))?;
            extents.push(Extent::Fixed(n));
        } else if is_identifier(item) {
            extents.push(Extent::Index(item.to_string()));
        } else {
            return Err((item, "dimension must be an index name or an integer"));
        }
    }
    Ok(MemberKind::Array { extents, layout })
}

pub fn parse_function(text: &str) -> Result<FunctionDecl, DeclarationError> {
    let decl = text.trim();
    let err = |fragment: &str, reason: &str| {
        DeclarationError::new(DeclarationKind::Function, decl, fragment, reason)
    };

    let open = decl.find('(').ok_or_else(|| err(decl, "missing '('"))?;
    let args_text = decl[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| err(&decl[open..], "argument list must end with ')'"))?;
    if args_text.contains(['(', ')']) {
        return Err(err(args_text, "unbalanced parentheses"));
    }

    let head = decl[..open].trim();
    let (returns, raw_name) = split_return(head).map_err(|(fragment, reason)| err(fragment, reason))?;
    if let Some(returns) = returns {
        if !is_identifier(returns) {
            return Err(err(returns, "return member must be an identifier"));
        }
    }
    let (groups, namer) = parse_name(raw_name).map_err(|(fragment, reason)| err(fragment, reason))?;

    let base_name = namer
        .fragments()
        .concat()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if base_name.is_empty() {
        return Err(err(raw_name, "function name has no literal part"));
    }

    let mut args = Vec::new();
    for piece in args_text.split(',') {
        if piece.trim().is_empty() {
            if args_text.trim().is_empty() {
                break;
            }
            return Err(err(args_text, "empty argument"));
        }
        args.push(parse_arg(decl, piece)?);
    }

    let mut seen: Vec<&str> = Vec::new();
    for name in args.iter().map(|a| a.name.as_str()).chain(groups.iter().map(|g| g.key.as_str())) {
        if seen.contains(&name) {
            return Err(err(name, "duplicate parameter or choice key"));
        }
        seen.push(name);
    }

    Ok(FunctionDecl {
        returns: returns.map(str::to_string),
        base_name,
        groups,
        args,
        namer,
    })
}

fn split_return(head: &str) -> Result<(Option<&str>, &str), (&str, &'static str)> {
    let mut depth = 0usize;
    for (pos, c) in head.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() && depth == 0 => {
                let rest = head[pos..].trim_start();
                if rest.is_empty() {
                    break;
                }
                return Ok((Some(&head[..pos]), rest));
            }
            _ => {}
        }
    }
    if head.is_empty() {
        return Err((head, "missing function name"));
    }
    Ok((None, head))
}

fn parse_name(raw: &str) -> Result<(Vec<ChoiceGroup>, SymbolNamer), (&str, &'static str)> {
    let mut groups: Vec<ChoiceGroup> = Vec::new();
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        if c == '{' {
            let close = rest.find('}').ok_or((rest, "unclosed '{'"))?;
            let body = &rest[1..close];
            let (key, choices) = body.split_once('|').ok_or((body, "choice group needs 'key | choices'"))?;
            let key = key.trim();
            if !key.starts_with(|c: char| c.is_ascii_alphabetic()) || !is_identifier(key) {
                return Err((key, "choice key must start with a letter"));
            }
            if groups.iter().any(|g| g.key == key) {
                return Err((key, "duplicate choice key"));
            }
            let choices: Vec<String> = choices.split(',').map(|s| s.trim().to_string()).collect();
            if choices.iter().any(|choice| choice.is_empty() || !choice.chars().all(is_word_char)) {
                return Err((body, "choices must be non-empty words"));
            }
            fragments.push(std::mem::take(&mut literal));
            groups.push(ChoiceGroup {
                key: key.to_string(),
                choices,
            });
            rest = &rest[close + 1..];
        } else if is_word_char(c) {
            literal.push(c);
            rest = &rest[c.len_utf8()..];
        } else {
            return Err((rest, "unexpected character in function name"));
        }
    }
    fragments.push(literal);
    Ok((groups, SymbolNamer::new(fragments)))
}

fn parse_arg(decl: &str, piece: &str) -> Result<ArgDecl, DeclarationError> {
    let piece = piece.trim();
    let err = |fragment: &str, reason: &str| {
        DeclarationError::new(DeclarationKind::Argument, decl, fragment, reason)
    };

    let (lhs, default_text) = match piece.split_once('=') {
        Some((lhs, default)) => (lhs.trim(), Some(default.trim())),
        None => (piece, None),
    };
    let tokens: Vec<&str> = lhs.split_whitespace().collect();
    let (type_token, upper_bound, name) = match tokens.as_slice() {
        [name] => (None, false, *name),
        [ty, "<", name] => (Some(*ty), true, *name),
        [ty, name] => match ty.strip_suffix('<') {
            Some(index) => (Some(index), true, *name),
            None => (Some(*ty), false, *name),
        },
        _ => return Err(err(piece, "expected '[type] name'")),
    };
    if !is_identifier(name) {
        return Err(err(name, "argument name must be an identifier"));
    }

    let arg_type = match type_token {
        None => ArgType::Untyped,
        Some("") => return Err(err(piece, "'<' needs an index type")),
        Some(token) => match CType::from_token(token) {
            Some(_) if upper_bound => return Err(err(token, "'<' only applies to index arguments")),
            Some(ctype) => ArgType::Primitive(ctype),
            None if is_identifier(token) => ArgType::Index(token.to_string()),
            None => return Err(err(token, "unknown argument type")),
        },
    };

    let default = match default_text {
        None => None,
        Some(value) => {
            if let Some(literal) = parse_literal(value) {
                if let ArgType::Primitive(ctype) = arg_type {
                    if !literal.fits(ctype) {
                        return Err(err(value, &format!("default does not fit type {ctype}")));
                    }
                }
                Some(DefaultExpr::Literal(literal))
            } else if is_identifier(value) {
                Some(DefaultExpr::Name(value.to_string()))
            } else {
                return Err(err(value, "default must be a literal or a member name"));
            }
        }
    };

    Ok(ArgDecl {
        name: name.to_string(),
        arg_type,
        upper_bound,
        default,
    })
}

/// Expands `{a, b}` groups into every combination, first group slowest.
///
/// `vec_{plus, minus}` gives `vec_plus` and `vec_minus`; text without
/// braces expands to itself.
pub fn expand_braces(pattern: &str) -> Result<Vec<String>, DeclarationError> {
    let err = |fragment: &str, reason: &str| {
        DeclarationError::new(DeclarationKind::Subset, pattern, fragment, reason)
    };
    let mut results = vec![String::new()];
    let mut rest = pattern.trim();
    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                results.iter_mut().for_each(|r| r.push_str(rest));
                break;
            }
            Some(pos) if rest[pos..].starts_with('}') => {
                return Err(err(&rest[pos..], "unmatched '}'"));
            }
            Some(pos) => {
                let literal = &rest[..pos];
                results.iter_mut().for_each(|r| r.push_str(literal));
                let after = &rest[pos + 1..];
                let close = after.find('}').ok_or_else(|| err(&rest[pos..], "unclosed '{'"))?;
                let body = &after[..close];
                if body.contains('{') {
                    return Err(err(body, "nested braces"));
                }
                let options: Vec<&str> = body.split(',').map(str::trim).collect();
                if options.iter().any(|o| o.is_empty()) {
                    return Err(err(body, "empty alternative"));
                }
                results = results
                    .iter()
                    .flat_map(|r| options.iter().map(move |o| format!("{r}{o}")))
                    .collect();
                rest = &after[close + 1..];
            }
        }
    }
    Ok(results)
}

/// Builds `"<type> <name>"` declarations for a comma-separated name list.
pub fn declare_members(ctype: CType, names: &str) -> Vec<String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| format!("{ctype} {name}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_forms() {
        let count = parse_member("num_i = 10").unwrap();
        assert_eq!(count.ctype, Some(CType::Int));
        assert_eq!(count.count_index(), Some("i"));
        assert_eq!(count.default, Some(Literal::Int(10)));

        let iliffe = parse_member("double a[i][j]").unwrap();
        assert_eq!(iliffe.layout(), Some(ArrayLayout::Iliffe));
        assert_eq!(
            iliffe.extents(),
            &[Extent::Index("i".into()), Extent::Index("j".into())]
        );

        let flat = parse_member("double b[i, 3]").unwrap();
        assert_eq!(flat.layout(), Some(ArrayLayout::Flat));
        assert_eq!(flat.extents(), &[Extent::Index("i".into()), Extent::Fixed(3)]);

        let scalar = parse_member("double dt = 1e-3").unwrap();
        assert_eq!(scalar.default, Some(Literal::Float(1e-3)));
    }

    #[test]
    fn member_errors() {
        assert!(parse_member("double num_i").is_err());
        assert!(parse_member("x").is_err());
        assert!(parse_member("quad x").is_err());
        assert!(parse_member("int a[i][j,k]").is_err());
        assert!(parse_member("int a[]").is_err());
        assert!(parse_member("int a = 1.5").is_err());
        assert!(parse_member("num_i = -1").is_err());
        assert!(parse_member("int a =").is_err());
        let e = parse_member("int a[i").unwrap_err();
        assert_eq!(e.kind, DeclarationKind::Member);
        assert_eq!(e.fragment, "[i");
    }

    #[test]
    fn function_with_groups() {
        let f = parse_function("func_{k1 | a, b, c}_{k2 | x, y}(i i1, i< i2=num_i, double t = 0.5)").unwrap();
        assert_eq!(f.base_name, "func");
        assert_eq!(f.groups.len(), 2);
        assert_eq!(f.concrete_names().len(), 6);
        assert_eq!(f.concrete_names()[0].0, "func_a_x");
        assert_eq!(f.param_names(), vec!["i1", "i2", "t", "k1", "k2"]);
        assert_eq!(f.args[0].arg_type, ArgType::Index("i".into()));
        assert!(!f.args[0].upper_bound);
        assert!(f.args[1].upper_bound);
        assert_eq!(f.args[1].default, Some(DefaultExpr::Name("num_i".into())));
        assert_eq!(f.args[2].default, Some(DefaultExpr::Literal(Literal::Float(0.5))));
    }

    #[test]
    fn function_return_and_base_name() {
        let f = parse_function("ans subvec_dot(i i1=0, i< i2=num_i)").unwrap();
        assert_eq!(f.returns.as_deref(), Some("ans"));
        assert_eq!(f.base_name, "subvec_dot");

        let g = parse_function("fill_{vec | v1, v2, v3}(int s)").unwrap();
        assert_eq!(g.base_name, "fill");
        assert_eq!(g.args[0].arg_type, ArgType::Primitive(CType::Int));

        let h = parse_function("{op | a, b}_{k | x}__tail()").unwrap();
        assert_eq!(h.base_name, "tail");
        assert_eq!(h.concrete_names()[0].0, "a_x__tail");
    }

    #[test]
    fn function_errors() {
        assert!(parse_function("f").is_err());
        assert!(parse_function("f(int a, int a)").is_err());
        assert!(parse_function("f_{k | a}(int k)").is_err());
        assert!(parse_function("f_{1k | a}()").is_err());
        assert!(parse_function("f_{k | }()").is_err());
        assert!(parse_function("f(double< x)").is_err());
        assert!(parse_function("f(int x=a+b)").is_err());
        assert!(parse_function("{k | a}()").is_err());
    }

    #[test]
    fn canonical_rendering_reparses() {
        for text in [
            "num_i = 10",
            "double a[i][j]",
            "double b[i,3] = 1.5",
            "longdouble x = 2",
            "bool flag = true",
        ] {
            let decl = parse_member(text).unwrap();
            assert_eq!(parse_member(&decl.to_string()).unwrap(), decl);
        }
        for text in [
            "ans subvec_dot(i i1=0, i< i2=num_i)",
            "func_{k1|a,b}_{k2|x}(int s, t)",
            "vec_{op | plus, minus}()",
        ] {
            let decl = parse_function(text).unwrap();
            assert_eq!(parse_function(&decl.to_string()).unwrap(), decl);
        }
    }

    #[test]
    fn braces_expand_to_product() {
        assert_eq!(
            expand_braces("vec_{plus, minus}").unwrap(),
            vec!["vec_plus", "vec_minus"]
        );
        assert_eq!(
            expand_braces("{a,b}_{x,y}").unwrap(),
            vec!["a_x", "a_y", "b_x", "b_y"]
        );
        assert_eq!(expand_braces("subvec_dot").unwrap(), vec!["subvec_dot"]);
        assert!(expand_braces("f_{a").is_err());
        assert!(expand_braces("f_a}").is_err());
    }

    #[test]
    fn declare_member_lists() {
        assert_eq!(
            declare_members(CType::Double, "a, b,c"),
            vec!["double a", "double b", "double c"]
        );
    }
}
