//! Runtime values of the script interpreter.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{NaiveDateTime, TimeDelta};
use serde_json::{Map, Number, Value as Json};

use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::error::RuntimeError;
use super::interp::Scope;

/// Upper bound on sequences built by repetition or `range` materialization.
pub(crate) const MAX_SEQUENCE_LEN: usize = 10_000_000;

#[derive(Clone)]
pub(crate) enum Val {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Val>>>),
    Tuple(Rc<[Val]>),
    Dict(Rc<RefCell<Dict>>),
    Range { start: i64, stop: i64, step: i64 },
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Object(Rc<Object>),
    Api,
}

pub(crate) struct Function {
    pub(crate) def: Rc<FunctionDef>,
    pub(crate) defaults: Vec<Option<Val>>,
    pub(crate) closure: Rc<Scope>,
}

pub(crate) struct BoundMethod {
    pub(crate) receiver: Val,
    pub(crate) name: &'static str,
}

/// A read-only record such as `context`.
pub(crate) struct Object {
    pub(crate) type_name: &'static str,
    pub(crate) fields: Vec<(&'static str, Val)>,
}

impl Object {
    pub(crate) fn field(&self, name: &str) -> Option<&Val> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// Hashable projection of a value. Numerically equal keys collide the way
/// `1`, `1.0` and `True` do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
}

impl Key {
    pub(crate) fn from_val(v: &Val) -> Result<Key, RuntimeError> {
        Ok(match v {
            Val::None => Key::None,
            Val::Bool(b) => Key::Int(i64::from(*b)),
            Val::Int(i) => Key::Int(*i),
            Val::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Key::Int(*f as i64)
                } else {
                    Key::Float(f.to_bits())
                }
            }
            Val::Str(s) => Key::Str(s.clone()),
            Val::Tuple(items) => Key::Tuple(items.iter().map(Key::from_val).collect::<Result<_, _>>()?),
            Val::DateTime(dt) => Key::DateTime(*dt),
            Val::TimeDelta(td) => Key::TimeDelta(*td),
            other => {
                return Err(RuntimeError::Type(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )));
            }
        })
    }
}

/// Insertion-ordered mapping.
#[derive(Default, Clone)]
pub(crate) struct Dict {
    entries: Vec<(Val, Val)>,
    index: HashMap<Key, usize>,
}

impl Dict {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn take_entries(&mut self) -> Vec<(Val, Val)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn get(&self, key: &Val) -> Result<Option<&Val>, RuntimeError> {
        let key = Key::from_val(key)?;
        Ok(self.index.get(&key).map(|&i| &self.entries[i].1))
    }

    pub(crate) fn contains(&self, key: &Val) -> Result<bool, RuntimeError> {
        Ok(self.index.contains_key(&Key::from_val(key)?))
    }

    pub(crate) fn insert(&mut self, key: Val, value: Val) -> Result<(), RuntimeError> {
        let hashed = Key::from_val(&key)?;
        if let Some(&i) = self.index.get(&hashed) {
            self.entries[i].1 = value;
        } else {
            self.index.insert(hashed, self.entries.len());
            self.entries.push((key, value));
        }
        Ok(())
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &Val> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Val> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &(Val, Val)> {
        self.entries.iter()
    }
}

impl Val {
    /// True for values that hold no shared, mutable or captured state.
    pub(crate) fn is_leaf(&self) -> bool {
        !matches!(
            self,
            Val::List(_) | Val::Tuple(_) | Val::Dict(_) | Val::Function(_) | Val::Method(_) | Val::Object(_)
        )
    }

    pub(crate) fn str(s: impl Into<Rc<str>>) -> Val {
        Val::Str(s.into())
    }

    pub(crate) fn list(items: Vec<Val>) -> Val {
        Val::List(Rc::new(RefCell::new(items)))
    }

    pub(crate) fn tuple(items: Vec<Val>) -> Val {
        Val::Tuple(items.into())
    }

    pub(crate) fn dict(dict: Dict) -> Val {
        Val::Dict(Rc::new(RefCell::new(dict)))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Val::None => "NoneType",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "str",
            Val::List(_) => "list",
            Val::Tuple(_) => "tuple",
            Val::Dict(_) => "dict",
            Val::Range { .. } => "range",
            Val::DateTime(_) => "datetime",
            Val::TimeDelta(_) => "timedelta",
            Val::Function(_) => "function",
            Val::Builtin(_) => "builtin_function_or_method",
            Val::Method(_) => "method",
            Val::Object(o) => o.type_name,
            Val::Api => "LawAPI",
        }
    }

    pub(crate) fn truthy(&self) -> bool {
        match self {
            Val::None => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::List(items) => !items.borrow().is_empty(),
            Val::Tuple(items) => !items.is_empty(),
            Val::Dict(d) => d.borrow().len() > 0,
            Val::Range { .. } => range_len(self) > 0,
            Val::TimeDelta(td) => !td.is_zero(),
            _ => true,
        }
    }

    /// Integer view of `bool` and `int`.
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Val::Bool(b) => Some(i64::from(*b)),
            Val::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub(crate) fn expect_int(&self, what: &str) -> Result<i64, RuntimeError> {
        self.as_int().ok_or_else(|| {
            RuntimeError::Type(format!(
                "{what} must be an integer, not '{}'",
                self.type_name()
            ))
        })
    }

    pub(crate) fn expect_str(&self, what: &str) -> Result<Rc<str>, RuntimeError> {
        match self {
            Val::Str(s) => Ok(s.clone()),
            other => Err(RuntimeError::Type(format!(
                "{what} must be str, not '{}'",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn from_json(json: &Json) -> Val {
        match json {
            Json::Null => Val::None,
            Json::Bool(b) => Val::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Val::Int(i),
                None => Val::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Val::str(s.as_str()),
            Json::Array(items) => Val::list(items.iter().map(Val::from_json).collect()),
            Json::Object(map) => {
                let mut dict = Dict::new();
                for (k, v) in map {
                    dict.entries.push((Val::str(k.as_str()), Val::from_json(v)));
                    dict.index.insert(Key::Str(k.as_str().into()), dict.entries.len() - 1);
                }
                Val::dict(dict)
            }
        }
    }

    pub(crate) fn to_json(&self) -> Result<Json, RuntimeError> {
        Ok(match self {
            Val::None => Json::Null,
            Val::Bool(b) => Json::Bool(*b),
            Val::Int(i) => Json::from(*i),
            Val::Float(f) => Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| RuntimeError::Value(format!("out of range float value: {f}")))?,
            Val::Str(s) => Json::String(s.to_string()),
            Val::List(items) => Json::Array(
                items
                    .borrow()
                    .iter()
                    .map(Val::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Val::Tuple(items) => {
                Json::Array(items.iter().map(Val::to_json).collect::<Result<_, _>>()?)
            }
            Val::Dict(d) => {
                let mut map = Map::new();
                for (k, v) in d.borrow().iter() {
                    let key = match k {
                        Val::Str(s) => s.to_string(),
                        Val::None | Val::Bool(_) | Val::Int(_) | Val::Float(_) => {
                            super::format::to_str(k)
                        }
                        other => {
                            return Err(RuntimeError::Type(format!(
                                "keys must be str, int, float, bool or None, not {}",
                                other.type_name()
                            )));
                        }
                    };
                    map.insert(key, v.to_json()?);
                }
                Json::Object(map)
            }
            Val::DateTime(_) | Val::TimeDelta(_) => Json::String(super::format::to_str(self)),
            other => {
                return Err(RuntimeError::Type(format!(
                    "object of type '{}' is not serializable",
                    other.type_name()
                )));
            }
        })
    }
}

pub(crate) fn range_len(v: &Val) -> usize {
    let Val::Range { start, stop, step } = *v else {
        return 0;
    };
    let (lo, hi, step) = if step > 0 {
        (i128::from(start), i128::from(stop), i128::from(step))
    } else {
        (i128::from(stop), i128::from(start), -i128::from(step))
    };
    if hi <= lo {
        0
    } else {
        usize::try_from((hi - lo + step - 1) / step).unwrap_or(usize::MAX)
    }
}

/// Script-level equality: numbers compare across int/float/bool.
pub(crate) fn loose_eq(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::None, Val::None) => true,
        (Val::Str(x), Val::Str(y)) => x == y,
        (Val::List(x), Val::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(&x.borrow(), &y.borrow())
        }
        (Val::Tuple(x), Val::Tuple(y)) => seq_eq(x, y),
        (Val::Dict(x), Val::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    matches!(y.get(k), Ok(Some(other)) if loose_eq(v, other))
                })
        }
        (Val::Range { .. }, Val::Range { .. }) => {
            range_items(a).map_or(false, |x| range_items(b).map_or(false, |y| seq_eq(&x, &y)))
        }
        (Val::DateTime(x), Val::DateTime(y)) => x == y,
        (Val::TimeDelta(x), Val::TimeDelta(y)) => x == y,
        (Val::Function(x), Val::Function(y)) => Rc::ptr_eq(x, y),
        (Val::Builtin(x), Val::Builtin(y)) => x == y,
        (Val::Object(x), Val::Object(y)) => Rc::ptr_eq(x, y),
        (Val::Api, Val::Api) => true,
        (Val::Int(x), Val::Int(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => match (a.as_int(), b.as_int()) {
                (Some(i), Some(j)) => i == j,
                _ => x == y,
            },
            _ => false,
        },
    }
}

fn seq_eq(x: &[Val], y: &[Val]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| loose_eq(a, b))
}

/// Materialize a range, refusing absurd sizes.
pub(crate) fn range_items(v: &Val) -> Result<Vec<Val>, RuntimeError> {
    let Val::Range { start, step, .. } = *v else {
        return Ok(Vec::new());
    };
    let len = range_len(v);
    if len > MAX_SEQUENCE_LEN {
        return Err(RuntimeError::Overflow);
    }
    Ok((0..len as i64).map(|i| Val::Int(start + i * step)).collect())
}

/// Script-level ordering; `Ok(None)` for unordered pairs such as NaN.
pub(crate) fn loose_cmp(a: &Val, b: &Val, op: &str) -> Result<Option<Ordering>, RuntimeError> {
    Ok(match (a, b) {
        (Val::Str(x), Val::Str(y)) => Some(x.cmp(y)),
        (Val::DateTime(x), Val::DateTime(y)) => Some(x.cmp(y)),
        (Val::TimeDelta(x), Val::TimeDelta(y)) => Some(x.cmp(y)),
        (Val::List(x), Val::List(y)) => seq_cmp(&x.borrow(), &y.borrow(), op)?,
        (Val::Tuple(x), Val::Tuple(y)) => seq_cmp(x, y, op)?,
        _ => match (a.as_int(), b.as_int()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => {
                    return Err(RuntimeError::Type(format!(
                        "'{op}' not supported between instances of '{}' and '{}'",
                        a.type_name(),
                        b.type_name()
                    )));
                }
            },
        },
    })
}

fn seq_cmp(x: &[Val], y: &[Val], op: &str) -> Result<Option<Ordering>, RuntimeError> {
    for (a, b) in x.iter().zip(y) {
        if !loose_eq(a, b) {
            return loose_cmp(a, b, op);
        }
    }
    Ok(Some(x.len().cmp(&y.len())))
}

/// Total order for sorting; unordered pairs compare equal.
pub(crate) fn sort_cmp(a: &Val, b: &Val) -> Result<Ordering, RuntimeError> {
    Ok(loose_cmp(a, b, "<")?.unwrap_or(Ordering::Equal))
}
