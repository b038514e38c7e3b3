use crate::array::{ArrayData, CArray};
use crate::class::SimClass;
use crate::errors::{BindError, BindResult};
use crate::instance::Instance;
use crate::scalar::Scalar;
use crate::value::{InPlace, Overrides, Value};
use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};
use simbind_types::CType;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Portable copy of an instance: scalars, allocated arrays, subset flags
/// and extra attributes. Object members are process-local and skipped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceState {
    pub class: String,
    pub values: IndexMap<String, StateValue>,
    #[serde(default)]
    pub subsets: IndexMap<String, bool>,
    #[serde(default)]
    pub extras: IndexMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StateValue {
    Scalar(Scalar),
    Array(ArraySnapshot),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArraySnapshot {
    pub ctype: CType,
    pub shape: Vec<usize>,
    pub data: Vec<Scalar>,
}

impl InstanceState {
    pub fn to_json(&self) -> BindResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> BindResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> BindResult<()> {
        fs::write(path, self.to_json()?).map_err(|e| BindError::StateIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> BindResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| BindError::StateIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text)
    }
}

impl Instance {
    pub fn snapshot(&self) -> BindResult<InstanceState> {
        let meta = self.metadata();
        let mut values = IndexMap::new();
        for member in &meta.members {
            if member.is_object() {
                continue;
            }
            let value = match self.get(&member.name) {
                Ok(Value::Scalar(scalar)) => StateValue::Scalar(scalar),
                Ok(Value::Array(array)) => {
                    let data = array.try_borrow()?;
                    StateValue::Array(ArraySnapshot {
                        ctype: data.ctype(),
                        shape: data.shape().to_vec(),
                        data: data.to_scalars(),
                    })
                }
                Ok(Value::Object(_)) | Err(BindError::NotAllocated { .. }) => continue,
                Err(e) => return Err(e),
            };
            values.insert(member.name.clone(), value);
        }
        Ok(InstanceState {
            class: meta.name.clone(),
            values,
            subsets: self.subset_flags().snapshot(),
            extras: self.extras().clone(),
        })
    }

    /// Rebuilds an instance from a snapshot taken of the same class.
    pub fn restore(class: &Arc<SimClass>, state: InstanceState) -> BindResult<Instance> {
        if state.class != class.name() {
            return Err(BindError::StateClassMismatch { expected: class.name().to_string(), found: state.class });
        }
        let mut overrides = Overrides::new().in_place(InPlace::Yes);
        for (name, on) in state.subsets {
            overrides = overrides.subset(name, on);
        }
        for (name, value) in state.values {
            let value = match value {
                StateValue::Scalar(scalar) => Value::Scalar(scalar),
                StateValue::Array(snapshot) => {
                    let data = ArrayData::from_scalars(snapshot.ctype, &snapshot.shape, &snapshot.data)?;
                    Value::Array(CArray::new(data))
                }
            };
            overrides = overrides.set(name, value);
        }
        let mut instance = Instance::new(class, overrides)?;
        instance.replace_extras(state.extras);
        Ok(instance)
    }
}
