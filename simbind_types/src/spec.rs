use crate::decl::SubsetDef;
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecFileError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse class spec: {0}")]
    Yaml(#[from] serde_yml::Error),
}

/// Entry of the `members` list: a declaration string or an object handle.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(untagged)]
#[serde(expecting = "expected a member declaration string or {object, tag}")]
pub enum MemberEntry {
    Declaration(String),
    Object { object: String, tag: String },
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct LibrarySpec {
    /// Bare library name; platform prefix and extension are added on load.
    pub name: String,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Exception kind and message raised for a native return code.
///
/// `{code}` and `{symbol}` in the message are replaced at call time.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorTemplate {
    pub kind: String,
    pub message: String,
}

impl ErrorTemplate {
    pub fn render(&self, code: i32, symbol: &str) -> String {
        self.message
            .replace("{code}", &code.to_string())
            .replace("{symbol}", symbol)
    }
}

/// Everything needed to compile one simulation class.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ClassSpec {
    pub name: String,
    /// Prepended to concrete function names; defaults to `<name>_`.
    #[serde(default)]
    pub func_prefix: Option<String>,
    #[serde(default)]
    pub library: Option<LibrarySpec>,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub subsets: IndexMap<String, SubsetDef>,
    #[serde(default)]
    pub errors: BTreeMap<i32, ErrorTemplate>,
}

impl ClassSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ClassSpec {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn member(mut self, decl: impl Into<String>) -> Self {
        self.members.push(MemberEntry::Declaration(decl.into()));
        self
    }

    pub fn members<I>(mut self, decls: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.members
            .extend(decls.into_iter().map(|d| MemberEntry::Declaration(d.into())));
        self
    }

    pub fn object_member(mut self, name: impl Into<String>, tag: impl Into<String>) -> Self {
        self.members.push(MemberEntry::Object {
            object: name.into(),
            tag: tag.into(),
        });
        self
    }

    pub fn function(mut self, decl: impl Into<String>) -> Self {
        self.functions.push(decl.into());
        self
    }

    pub fn functions<I>(mut self, decls: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.functions.extend(decls.into_iter().map(Into::into));
        self
    }

    pub fn subset(mut self, name: impl Into<String>, def: SubsetDef) -> Self {
        self.subsets.insert(name.into(), def);
        self
    }

    pub fn error(mut self, code: i32, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors.insert(
            code,
            ErrorTemplate {
                kind: kind.into(),
                message: message.into(),
            },
        );
        self
    }

    pub fn func_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.func_prefix = Some(prefix.into());
        self
    }

    pub fn library(mut self, name: impl Into<String>, dir: Option<PathBuf>) -> Self {
        self.library = Some(LibrarySpec {
            name: name.into(),
            dir,
        });
        self
    }

    pub fn effective_func_prefix(&self) -> String {
        match &self.func_prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}_", self.name),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, SpecFileError> {
        Ok(serde_yml::from_str(text)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, SpecFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| SpecFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, SpecFileError> {
        Ok(serde_yml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECT_CALC: &str = r#"
name: VectCalc
members:
  - num_i = 10
  - int v1[i] = 1
  - int v2[i] = 2
  - int v3[i]
  - int ans
  - object: solver
    tag: Solver
functions:
  - vec_{op | plus, minus, times, divide}()
  - ans subvec_dot(i i1=0, i< i2=num_i)
subsets:
  vec:
    members: [v1, v2, v3]
    funcs: ["vec_{plus, minus, times, divide}"]
  dot:
    members: [v1, v2]
    funcs: [subvec_dot]
    default: true
errors:
  1:
    kind: ValueError
    message: "{symbol} failed with {code}"
"#;

    #[test]
    fn parses_yaml_spec() {
        let spec = ClassSpec::from_yaml_str(VECT_CALC).unwrap();
        assert_eq!(spec.name, "VectCalc");
        assert_eq!(spec.members.len(), 6);
        assert_eq!(
            spec.members[5],
            MemberEntry::Object {
                object: "solver".into(),
                tag: "Solver".into()
            }
        );
        assert_eq!(spec.subsets.keys().collect::<Vec<_>>(), vec!["vec", "dot"]);
        assert!(!spec.subsets["vec"].default);
        assert!(spec.subsets["dot"].default);
        assert_eq!(spec.errors[&1].render(1, "vec_divide"), "vec_divide failed with 1");
        assert_eq!(spec.effective_func_prefix(), "VectCalc_");
    }

    #[test]
    fn builder_matches_yaml_shape() {
        let spec = ClassSpec::new("Sim")
            .members(["num_i = 2", "double x[i]"])
            .function("step()")
            .func_prefix("");
        assert_eq!(spec.effective_func_prefix(), "");
        let reparsed = ClassSpec::from_yaml_str(&spec.to_yaml_string().unwrap()).unwrap();
        assert_eq!(reparsed, spec);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClassSpec::from_yaml_file(Path::new("/nonexistent/spec.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/spec.yaml"));
    }
}
