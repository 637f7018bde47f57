//! Runtime values and instance storage
//!
//! An instance keeps two stores:
//! - `direct`: one slot vector per type in its hierarchy, laid out by that
//!   type's original (generation 0) field layout
//! - `extension`: lazily created storage for fields introduced after the
//!   original layout, keyed by declaring type and field name
//!
//! Both survive every redefinition, which is what keeps instance state
//! continuous across versions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ast::TypeIdentity;
use crate::compiler::{Const, Ty};

pub type ObjectRef = Arc<Instance>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(ObjectRef),
}

impl Value {
    pub fn from_const(value: &Const) -> Self {
        match value {
            Const::Null => Value::Null,
            Const::Bool(v) => Value::Bool(*v),
            Const::Int(v) => Value::Int(*v),
            Const::Float(v) => Value::Float(*v),
            Const::Str(v) => Value::Str(v.clone()),
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "string".to_string(),
            Value::Object(object) => object.class().to_string(),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Apply the implicit `int` to `float` widening for a declared type
    pub fn coerce_to(self, ty: &Ty) -> Self {
        match (self, ty) {
            (Value::Int(v), Ty::Float) => Value::Float(v as f64),
            (value, _) => value,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Str(v) => f.write_str(v),
            Value::Object(object) => write!(f, "<{}>", object.class()),
        }
    }
}

#[derive(Debug, Default)]
struct InstanceState {
    direct: HashMap<TypeIdentity, Vec<Value>>,
    extension: HashMap<(TypeIdentity, String), Value>,
}

/// A live object
#[derive(Debug)]
pub struct Instance {
    class: TypeIdentity,
    state: RwLock<InstanceState>,
}

impl Instance {
    pub(crate) fn new(class: TypeIdentity, direct: HashMap<TypeIdentity, Vec<Value>>) -> Self {
        Self {
            class,
            state: RwLock::new(InstanceState {
                direct,
                extension: HashMap::new(),
            }),
        }
    }

    pub fn class(&self) -> &TypeIdentity {
        &self.class
    }

    /// Read a slot of `owner`'s original layout; `None` when this instance
    /// was allocated without that layout
    pub fn read_slot(&self, owner: &TypeIdentity, slot: usize) -> Option<Value> {
        self.state
            .read()
            .direct
            .get(owner)
            .and_then(|slots| slots.get(slot))
            .cloned()
    }

    pub fn write_slot(&self, owner: &TypeIdentity, slot: usize, value: Value) -> bool {
        let mut state = self.state.write();
        match state.direct.get_mut(owner).and_then(|slots| slots.get_mut(slot)) {
            Some(target) => {
                *target = value;
                true
            }
            None => false,
        }
    }

    /// Read extension storage, falling back to `default` when the field was
    /// never written on this instance
    pub fn read_extension(&self, owner: &TypeIdentity, name: &str, default: &Const) -> Value {
        self.state
            .read()
            .extension
            .get(&(owner.clone(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| Value::from_const(default))
    }

    pub fn write_extension(&self, owner: &TypeIdentity, name: &str, value: Value) {
        self.state
            .write()
            .extension
            .insert((owner.clone(), name.to_string()), value);
    }

    /// Number of extension fields materialized on this instance
    pub fn extension_len(&self) -> usize {
        self.state.read().extension.len()
    }
}
