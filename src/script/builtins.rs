//! The allow-listed builtin functions and the methods of builtin types.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};

use super::api::LawApi;
use super::error::RuntimeError;
use super::format::{datetime_str, repr, strftime, timedelta_parts, to_str};
use super::interp::{binop, concat_len, unique, Interpreter};
use super::ast::BinOp;
use super::value::{loose_eq, loose_cmp, range_len, sort_cmp, BoundMethod, Dict, Val};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Len,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Set,
    Tuple,
    Range,
    Enumerate,
    Zip,
    Map,
    Filter,
    Max,
    Min,
    Sum,
    Abs,
    Round,
    Sorted,
    DateTime,
    TimeDelta,
}

const ALL: [Builtin; 22] = [
    Builtin::Len,
    Builtin::Str,
    Builtin::Int,
    Builtin::Float,
    Builtin::Bool,
    Builtin::List,
    Builtin::Dict,
    Builtin::Set,
    Builtin::Tuple,
    Builtin::Range,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::Map,
    Builtin::Filter,
    Builtin::Max,
    Builtin::Min,
    Builtin::Sum,
    Builtin::Abs,
    Builtin::Round,
    Builtin::Sorted,
    Builtin::DateTime,
    Builtin::TimeDelta,
];

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "startswith", "endswith", "split", "join",
    "replace", "find", "count", "isdigit",
];
const LIST_METHODS: &[&str] = &["append", "extend", "pop", "index", "count", "insert", "remove"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items"];
const DATETIME_METHODS: &[&str] = &["isoformat", "weekday", "strftime", "timestamp"];
const DATETIME_CLASS_METHODS: &[&str] = &["now", "utcnow", "fromisoformat"];
const TIMEDELTA_METHODS: &[&str] = &["total_seconds"];

impl Builtin {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        ALL.into_iter().find(|b| b.name() == name)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Tuple => "tuple",
            Builtin::Range => "range",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Map => "map",
            Builtin::Filter => "filter",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Sum => "sum",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::DateTime => "datetime",
            Builtin::TimeDelta => "timedelta",
        }
    }
}

fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Type(message.into())
}

fn value_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Value(message.into())
}

/// Match call arguments to named parameters; the first `required` must be
/// supplied.
pub(crate) fn bind(
    func: &str,
    params: &[&str],
    required: usize,
    args: Vec<Val>,
    kwargs: Vec<(String, Val)>,
) -> Result<Vec<Option<Val>>, RuntimeError> {
    if args.len() > params.len() {
        return Err(type_error(format!(
            "{func}() takes at most {} argument{} ({} given)",
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len()
        )));
    }
    let mut slots: Vec<Option<Val>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);
    for (name, value) in kwargs {
        match params.iter().position(|p| *p == name) {
            Some(i) if slots[i].is_none() => slots[i] = Some(value),
            Some(_) => {
                return Err(type_error(format!(
                    "{func}() got multiple values for argument '{name}'"
                )));
            }
            None => {
                return Err(type_error(format!(
                    "{func}() got an unexpected keyword argument '{name}'"
                )));
            }
        }
    }
    if let Some(missing) = slots[..required].iter().position(Option::is_none) {
        return Err(type_error(format!(
            "{func}() missing required argument '{}'",
            params[missing]
        )));
    }
    Ok(slots)
}

fn no_keywords(func: &str, kwargs: &[(String, Val)]) -> Result<(), RuntimeError> {
    match kwargs.first() {
        Some((name, _)) => Err(type_error(format!(
            "{func}() got an unexpected keyword argument '{name}'"
        ))),
        None => Ok(()),
    }
}

/// Present-or-`None` view of a bound slot; `None` and omitted are the same.
fn given(slot: &Option<Val>) -> Option<&Val> {
    match slot {
        None | Some(Val::None) => None,
        Some(v) => Some(v),
    }
}

fn arg(slots: &mut [Option<Val>], i: usize) -> Val {
    slots[i].take().unwrap_or(Val::None)
}

fn to_i32(v: &Val, what: &str) -> Result<i32, RuntimeError> {
    i32::try_from(v.expect_int(what)?).map_err(|_| value_error(format!("{what} is out of range")))
}

fn to_u32(v: &Val, what: &str) -> Result<u32, RuntimeError> {
    u32::try_from(v.expect_int(what)?).map_err(|_| value_error(format!("{what} is out of range")))
}

fn float_to_int(f: f64) -> Result<i64, RuntimeError> {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    let truncated = f.trunc();
    if truncated < -9.223_372_036_854_775e18 || truncated >= 9.223_372_036_854_775e18 {
        return Err(RuntimeError::Overflow);
    }
    Ok(truncated as i64)
}

/// Stable merge sort over indices with a fallible comparator.
fn merge_sort(
    order: &mut [usize],
    cmp: &mut impl FnMut(usize, usize) -> Result<Ordering, RuntimeError>,
) -> Result<(), RuntimeError> {
    if order.len() <= 1 {
        return Ok(());
    }
    let mid = order.len() / 2;
    merge_sort(&mut order[..mid], cmp)?;
    merge_sort(&mut order[mid..], cmp)?;
    let mut merged = Vec::with_capacity(order.len());
    let (mut i, mut j) = (0, mid);
    while i < mid && j < order.len() {
        if cmp(order[j], order[i])? == Ordering::Less {
            merged.push(order[j]);
            j += 1;
        } else {
            merged.push(order[i]);
            i += 1;
        }
    }
    merged.extend_from_slice(&order[i..mid]);
    merged.extend_from_slice(&order[j..]);
    order.copy_from_slice(&merged);
    Ok(())
}

impl Interpreter<'_> {
    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        let name = builtin.name();
        match builtin {
            Builtin::Len => {
                let mut slots = bind(name, &["obj"], 1, args, kwargs)?;
                let obj = arg(&mut slots, 0);
                let len = match &obj {
                    Val::Str(s) => s.chars().count(),
                    Val::List(items) => items.borrow().len(),
                    Val::Tuple(items) => items.len(),
                    Val::Dict(d) => d.borrow().len(),
                    Val::Range { .. } => range_len(&obj),
                    other => {
                        return Err(type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Val::Int(i64::try_from(len).map_err(|_| RuntimeError::Overflow)?))
            }
            Builtin::Str => {
                let slots = bind(name, &["object"], 0, args, kwargs)?;
                Ok(Val::str(slots[0].as_ref().map(to_str).unwrap_or_default()))
            }
            Builtin::Int => {
                let slots = bind(name, &["x"], 0, args, kwargs)?;
                Ok(Val::Int(match &slots[0] {
                    None => 0,
                    Some(Val::Float(f)) => float_to_int(*f)?,
                    Some(Val::Str(s)) => {
                        let digits: String = s.trim().chars().filter(|c| *c != '_').collect();
                        digits.parse().map_err(|_| {
                            value_error(format!(
                                "invalid literal for int() with base 10: {}",
                                repr(&Val::Str(s.clone()))
                            ))
                        })?
                    }
                    Some(v) => v.as_int().ok_or_else(|| {
                        type_error(format!(
                            "int() argument must be a string or a number, not '{}'",
                            v.type_name()
                        ))
                    })?,
                }))
            }
            Builtin::Float => {
                let slots = bind(name, &["x"], 0, args, kwargs)?;
                Ok(Val::Float(match &slots[0] {
                    None => 0.0,
                    Some(Val::Str(s)) => s.trim().parse().map_err(|_| {
                        value_error(format!(
                            "could not convert string to float: {}",
                            repr(&Val::Str(s.clone()))
                        ))
                    })?,
                    Some(v) => v.as_f64().ok_or_else(|| {
                        type_error(format!(
                            "float() argument must be a string or a number, not '{}'",
                            v.type_name()
                        ))
                    })?,
                }))
            }
            Builtin::Bool => {
                let slots = bind(name, &["x"], 0, args, kwargs)?;
                Ok(Val::Bool(slots[0].as_ref().is_some_and(Val::truthy)))
            }
            Builtin::List | Builtin::Tuple | Builtin::Set => {
                let slots = bind(name, &["iterable"], 0, args, kwargs)?;
                let items = match &slots[0] {
                    Some(v) => self.iterate(v)?,
                    None => Vec::new(),
                };
                Ok(match builtin {
                    Builtin::Tuple => Val::tuple(items),
                    Builtin::Set => Val::list(unique(items)),
                    _ => Val::list(items),
                })
            }
            Builtin::Dict => {
                if args.len() > 1 {
                    return Err(type_error(format!(
                        "dict expected at most 1 argument, got {}",
                        args.len()
                    )));
                }
                let mut dict = Dict::new();
                if let Some(source) = args.first() {
                    if let Val::Dict(d) = source {
                        dict = d.borrow().clone();
                    } else {
                        for (n, pair) in self.iterate(source)?.iter().enumerate() {
                            let pair = self.iterate(pair)?;
                            let [key, value] = <[Val; 2]>::try_from(pair).map_err(|pair| {
                                value_error(format!(
                                    "dictionary update sequence element #{n} has length {}; 2 is required",
                                    pair.len()
                                ))
                            })?;
                            dict.insert(key, value)?;
                        }
                    }
                }
                for (key, value) in kwargs {
                    dict.insert(Val::str(key), value)?;
                }
                Ok(Val::dict(dict))
            }
            Builtin::Range => {
                no_keywords(name, &kwargs)?;
                let ints = args
                    .iter()
                    .map(|v| {
                        v.as_int().ok_or_else(|| {
                            type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                v.type_name()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints[..] {
                    [stop] => (0, stop, 1),
                    [start, stop] => (start, stop, 1),
                    [start, stop, step] => (start, stop, step),
                    _ => {
                        return Err(type_error(format!(
                            "range expected 1 to 3 arguments, got {}",
                            ints.len()
                        )));
                    }
                };
                if step == 0 {
                    return Err(value_error("range() arg 3 must not be zero"));
                }
                Ok(Val::Range { start, stop, step })
            }
            Builtin::Enumerate => {
                let mut slots = bind(name, &["iterable", "start"], 1, args, kwargs)?;
                let start = match given(&slots[1]) {
                    Some(v) => v.expect_int("start")?,
                    None => 0,
                };
                let items = self.iterate(&arg(&mut slots, 0))?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let index = i64::try_from(i)
                        .ok()
                        .and_then(|i| start.checked_add(i))
                        .ok_or(RuntimeError::Overflow)?;
                    out.push(Val::tuple(vec![Val::Int(index), item]));
                }
                Ok(Val::list(out))
            }
            Builtin::Zip => {
                no_keywords(name, &kwargs)?;
                let columns = self.zip_columns(&args)?;
                Ok(Val::list(columns.into_iter().map(Val::tuple).collect()))
            }
            Builtin::Map => {
                no_keywords(name, &kwargs)?;
                let Some((func, iterables)) = args.split_first() else {
                    return Err(type_error("map() must have at least two arguments"));
                };
                if iterables.is_empty() {
                    return Err(type_error("map() must have at least two arguments"));
                }
                let mut out = Vec::new();
                for row in self.zip_columns(iterables)? {
                    out.push(self.call(func, row, Vec::new())?);
                }
                Ok(Val::list(out))
            }
            Builtin::Filter => {
                let mut slots = bind(name, &["function", "iterable"], 2, args, kwargs)?;
                let func = arg(&mut slots, 0);
                let mut out = Vec::new();
                for item in self.iterate(&arg(&mut slots, 1))? {
                    let keep = match func {
                        Val::None => item.truthy(),
                        _ => self.call(&func, vec![item.clone()], Vec::new())?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Val::list(out))
            }
            Builtin::Max | Builtin::Min => self.extremum(builtin, args, kwargs),
            Builtin::Sum => {
                let mut slots = bind(name, &["iterable", "start"], 1, args, kwargs)?;
                let mut total = slots[1].take().unwrap_or(Val::Int(0));
                if matches!(total, Val::Str(_)) {
                    return Err(type_error("sum() can't sum strings"));
                }
                for item in self.iterate(&arg(&mut slots, 0))? {
                    total = binop(BinOp::Add, &total, &item)?;
                }
                Ok(total)
            }
            Builtin::Abs => {
                let mut slots = bind(name, &["x"], 1, args, kwargs)?;
                match arg(&mut slots, 0) {
                    Val::Float(f) => Ok(Val::Float(f.abs())),
                    Val::TimeDelta(t) => Ok(Val::TimeDelta(t.abs())),
                    v => v
                        .as_int()
                        .ok_or_else(|| {
                            type_error(format!("bad operand type for abs(): '{}'", v.type_name()))
                        })?
                        .checked_abs()
                        .map(Val::Int)
                        .ok_or(RuntimeError::Overflow),
                }
            }
            Builtin::Round => {
                let mut slots = bind(name, &["number", "ndigits"], 1, args, kwargs)?;
                let ndigits = given(&slots[1]).map(|v| v.expect_int("ndigits")).transpose()?;
                round(&arg(&mut slots, 0), ndigits)
            }
            Builtin::Sorted => {
                let mut slots = bind(name, &["iterable", "key", "reverse"], 1, args, kwargs)?;
                let reverse = given(&slots[2]).is_some_and(Val::truthy);
                let key = given(&slots[1]).cloned();
                let items = self.iterate(&arg(&mut slots, 0))?;
                Ok(Val::list(self.sorted(items, key.as_ref(), reverse)?))
            }
            Builtin::DateTime => {
                let slots = bind(
                    name,
                    &["year", "month", "day", "hour", "minute", "second", "microsecond"],
                    3,
                    args,
                    kwargs,
                )?;
                let part = |i: usize, what: &str| match &slots[i] {
                    Some(v) => to_u32(v, what),
                    None => Ok(0),
                };
                let year = to_i32(slots[0].as_ref().unwrap_or(&Val::None), "year")?;
                let date = NaiveDate::from_ymd_opt(year, part(1, "month")?, part(2, "day")?)
                    .ok_or_else(|| value_error("day is out of range for month"))?;
                let datetime = date
                    .and_hms_micro_opt(
                        part(3, "hour")?,
                        part(4, "minute")?,
                        part(5, "second")?,
                        part(6, "microsecond")?,
                    )
                    .ok_or_else(|| value_error("time component out of range"))?;
                Ok(Val::DateTime(datetime))
            }
            Builtin::TimeDelta => {
                const UNITS: [(&str, f64); 7] = [
                    ("days", 86_400_000_000.0),
                    ("seconds", 1_000_000.0),
                    ("microseconds", 1.0),
                    ("milliseconds", 1_000.0),
                    ("minutes", 60_000_000.0),
                    ("hours", 3_600_000_000.0),
                    ("weeks", 604_800_000_000.0),
                ];
                let params: Vec<&str> = UNITS.iter().map(|(n, _)| *n).collect();
                let slots = bind(name, &params, 0, args, kwargs)?;
                let mut micros = 0.0;
                for (slot, (unit, scale)) in slots.iter().zip(UNITS) {
                    if let Some(v) = slot {
                        let amount = v.as_f64().ok_or_else(|| {
                            type_error(format!(
                                "unsupported type for timedelta {unit} component: {}",
                                v.type_name()
                            ))
                        })?;
                        micros += amount * scale;
                    }
                }
                let micros = micros.round();
                if !micros.is_finite() || micros.abs() >= 9.2e18 {
                    return Err(RuntimeError::Overflow);
                }
                Ok(Val::TimeDelta(TimeDelta::microseconds(micros as i64)))
            }
        }
    }

    /// Rows of `zip(*iterables)`.
    fn zip_columns(&self, iterables: &[Val]) -> Result<Vec<Vec<Val>>, RuntimeError> {
        let columns = iterables
            .iter()
            .map(|v| self.iterate(v))
            .collect::<Result<Vec<_>, _>>()?;
        let len = columns.iter().map(Vec::len).min().unwrap_or(0);
        Ok((0..len)
            .map(|i| columns.iter().map(|c| c[i].clone()).collect())
            .collect())
    }

    fn sort_keys(&mut self, items: &[Val], key: Option<&Val>) -> Result<Vec<Val>, RuntimeError> {
        match key {
            Some(func) => items
                .iter()
                .map(|item| self.call(func, vec![item.clone()], Vec::new()))
                .collect(),
            None => Ok(items.to_vec()),
        }
    }

    fn sorted(&mut self, items: Vec<Val>, key: Option<&Val>, reverse: bool) -> Result<Vec<Val>, RuntimeError> {
        let keys = self.sort_keys(&items, key)?;
        let mut order: Vec<usize> = (0..items.len()).collect();
        merge_sort(&mut order, &mut |a, b| {
            let ordering = sort_cmp(&keys[a], &keys[b])?;
            Ok(if reverse { ordering.reverse() } else { ordering })
        })?;
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    fn extremum(
        &mut self,
        builtin: Builtin,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        let name = builtin.name();
        let mut key = None;
        let mut default = None;
        for (k, v) in kwargs {
            match k.as_str() {
                "key" => key = Some(v).filter(|v| !matches!(v, Val::None)),
                "default" => default = Some(v),
                _ => {
                    return Err(type_error(format!(
                        "{name}() got an unexpected keyword argument '{k}'"
                    )));
                }
            }
        }
        let items = match args.len() {
            0 => return Err(type_error(format!("{name} expected at least 1 argument, got 0"))),
            1 => self.iterate(&args[0])?,
            _ => args,
        };
        let keys = self.sort_keys(&items, key.as_ref())?;
        let wanted = if builtin == Builtin::Max {
            Ordering::Greater
        } else {
            Ordering::Less
        };
        let mut best: Option<usize> = None;
        for i in 0..items.len() {
            let better = match best {
                None => true,
                Some(b) => {
                    loose_cmp(&keys[i], &keys[b], if wanted == Ordering::Greater { ">" } else { "<" })?
                        == Some(wanted)
                }
            };
            if better {
                best = Some(i);
            }
        }
        match best {
            Some(i) => Ok(items[i].clone()),
            None => default.ok_or_else(|| value_error(format!("{name}() arg is an empty sequence"))),
        }
    }

    // -- Attributes and methods ---------------------------------------------

    pub(crate) fn get_attr(&self, object: &Val, attr: &str) -> Result<Val, RuntimeError> {
        let pick = |names: &[&'static str]| names.iter().copied().find(|n| *n == attr);
        let method = match object {
            Val::Object(o) => {
                if let Some(value) = o.field(attr) {
                    return Ok(value.clone());
                }
                None
            }
            Val::Api => pick(LawApi::METHODS),
            Val::Str(_) => pick(STR_METHODS),
            Val::List(_) => pick(LIST_METHODS),
            Val::Dict(_) => pick(DICT_METHODS),
            Val::DateTime(dt) => {
                let field = match attr {
                    "year" => Some(i64::from(dt.year())),
                    "month" => Some(i64::from(dt.month())),
                    "day" => Some(i64::from(dt.day())),
                    "hour" => Some(i64::from(dt.hour())),
                    "minute" => Some(i64::from(dt.minute())),
                    "second" => Some(i64::from(dt.second())),
                    "microsecond" => Some(i64::from(dt.nanosecond() % 1_000_000_000 / 1_000)),
                    _ => None,
                };
                if let Some(value) = field {
                    return Ok(Val::Int(value));
                }
                pick(DATETIME_METHODS)
            }
            Val::TimeDelta(td) => {
                let (days, seconds, micros) = timedelta_parts(*td);
                match attr {
                    "days" => return Ok(Val::Int(days)),
                    "seconds" => return Ok(Val::Int(seconds)),
                    "microseconds" => return Ok(Val::Int(micros)),
                    _ => pick(TIMEDELTA_METHODS),
                }
            }
            Val::Builtin(Builtin::DateTime) => pick(DATETIME_CLASS_METHODS),
            _ => None,
        };
        match method {
            Some(name) => Ok(Val::Method(Rc::new(BoundMethod {
                receiver: object.clone(),
                name,
            }))),
            None => Err(RuntimeError::Attribute {
                type_name: object.type_name().to_owned(),
                attr: attr.to_owned(),
            }),
        }
    }

    pub(crate) fn call_method(
        &mut self,
        receiver: &Val,
        name: &'static str,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        match receiver {
            Val::Api => self.api.call(name, args, kwargs),
            Val::Str(s) => self.str_method(s, name, args, kwargs),
            Val::List(items) => self.list_method(items, name, args, kwargs),
            Val::Dict(d) => dict_method(d, name, args, kwargs),
            Val::DateTime(dt) => datetime_method(dt, name, args, kwargs),
            Val::TimeDelta(td) => {
                bind(name, &[], 0, args, kwargs)?;
                let (days, seconds, micros) = timedelta_parts(*td);
                Ok(Val::Float(
                    days as f64 * 86_400.0 + seconds as f64 + micros as f64 / 1_000_000.0,
                ))
            }
            Val::Builtin(Builtin::DateTime) => match name {
                "fromisoformat" => {
                    let mut slots = bind(name, &["date_string"], 1, args, kwargs)?;
                    let text = arg(&mut slots, 0).expect_str("fromisoformat: argument")?;
                    parse_iso(&text).map(Val::DateTime)
                }
                _ => {
                    bind(name, &[], 0, args, kwargs)?;
                    Ok(Val::DateTime(Utc::now().naive_utc()))
                }
            },
            other => Err(RuntimeError::Attribute {
                type_name: other.type_name().to_owned(),
                attr: name.to_owned(),
            }),
        }
    }

    fn str_method(
        &mut self,
        s: &Rc<str>,
        name: &'static str,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        let text: &str = s;
        Ok(match name {
            "lower" | "upper" | "isdigit" => {
                bind(name, &[], 0, args, kwargs)?;
                match name {
                    "lower" => Val::str(text.to_lowercase()),
                    "upper" => Val::str(text.to_uppercase()),
                    _ => Val::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())),
                }
            }
            "strip" | "lstrip" | "rstrip" => {
                let slots = bind(name, &["chars"], 0, args, kwargs)?;
                let chars = given(&slots[0]).map(|v| v.expect_str("chars")).transpose()?;
                let strip = |c: char| match &chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                Val::str(match name {
                    "strip" => text.trim_matches(strip),
                    "lstrip" => text.trim_start_matches(strip),
                    _ => text.trim_end_matches(strip),
                })
            }
            "startswith" | "endswith" => {
                let mut slots = bind(name, &["prefix"], 1, args, kwargs)?;
                let candidates = match arg(&mut slots, 0) {
                    Val::Tuple(items) => items.to_vec(),
                    other => vec![other],
                };
                let mut hit = false;
                for candidate in candidates {
                    let candidate = candidate.expect_str(&format!("{name} argument"))?;
                    hit |= if name == "startswith" {
                        text.starts_with(&*candidate)
                    } else {
                        text.ends_with(&*candidate)
                    };
                }
                Val::Bool(hit)
            }
            "split" => {
                let slots = bind(name, &["sep", "maxsplit"], 0, args, kwargs)?;
                let maxsplit = match given(&slots[1]) {
                    Some(v) => v.expect_int("maxsplit")?,
                    None => -1,
                };
                let limit = usize::try_from(maxsplit).ok();
                let parts: Vec<Val> = match given(&slots[0]) {
                    Some(sep) => {
                        let sep = sep.expect_str("sep")?;
                        if sep.is_empty() {
                            return Err(value_error("empty separator"));
                        }
                        match limit {
                            Some(n) => text.splitn(n + 1, &*sep).map(Val::str).collect(),
                            None => text.split(&*sep).map(Val::str).collect(),
                        }
                    }
                    None => split_whitespace(text, limit).into_iter().map(Val::str).collect(),
                };
                Val::list(parts)
            }
            "join" => {
                let mut slots = bind(name, &["iterable"], 1, args, kwargs)?;
                let items = self.iterate(&arg(&mut slots, 0))?;
                let mut pieces = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Val::Str(piece) => pieces.push(piece.to_string()),
                        other => {
                            return Err(type_error(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            )));
                        }
                    }
                }
                Val::str(pieces.join(text))
            }
            "replace" => {
                let mut slots = bind(name, &["old", "new", "count"], 2, args, kwargs)?;
                let old = arg(&mut slots, 0).expect_str("replace() argument 1")?;
                let new = arg(&mut slots, 1).expect_str("replace() argument 2")?;
                match given(&slots[2]).map(|v| v.expect_int("count")).transpose()? {
                    Some(n) if n >= 0 => {
                        Val::str(text.replacen(&*old, &new, usize::try_from(n).unwrap_or(usize::MAX)))
                    }
                    _ => Val::str(text.replace(&*old, &new)),
                }
            }
            "find" => {
                let mut slots = bind(name, &["sub"], 1, args, kwargs)?;
                let sub = arg(&mut slots, 0).expect_str("find() argument")?;
                Val::Int(match text.find(&*sub) {
                    Some(byte) => text[..byte].chars().count() as i64,
                    None => -1,
                })
            }
            _ => {
                let mut slots = bind(name, &["sub"], 1, args, kwargs)?;
                let sub = arg(&mut slots, 0).expect_str("count() argument")?;
                let count = if sub.is_empty() {
                    text.chars().count() + 1
                } else {
                    text.matches(&*sub).count()
                };
                Val::Int(count as i64)
            }
        })
    }

    fn list_method(
        &mut self,
        items: &Rc<RefCell<Vec<Val>>>,
        name: &'static str,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        match name {
            "append" => {
                let mut slots = bind(name, &["object"], 1, args, kwargs)?;
                let value = arg(&mut slots, 0);
                self.note_stored(&Val::List(Rc::clone(items)), std::slice::from_ref(&value));
                items.borrow_mut().push(value);
                Ok(Val::None)
            }
            "extend" => {
                let mut slots = bind(name, &["iterable"], 1, args, kwargs)?;
                let extra = self.iterate(&arg(&mut slots, 0))?;
                concat_len(items.borrow().len(), extra.len())?;
                self.note_stored(&Val::List(Rc::clone(items)), &extra);
                items.borrow_mut().extend(extra);
                Ok(Val::None)
            }
            "pop" => {
                let slots = bind(name, &["index"], 0, args, kwargs)?;
                let mut list = items.borrow_mut();
                if list.is_empty() {
                    return Err(RuntimeError::Index("pop from empty list".to_owned()));
                }
                let len = list.len() as i64;
                let index = match given(&slots[0]) {
                    Some(v) => v.expect_int("index")?,
                    None => -1,
                };
                let at = if index < 0 { index + len } else { index };
                if !(0..len).contains(&at) {
                    return Err(RuntimeError::Index("pop index out of range".to_owned()));
                }
                Ok(list.remove(at as usize))
            }
            "insert" => {
                let mut slots = bind(name, &["index", "object"], 2, args, kwargs)?;
                let index = arg(&mut slots, 0).expect_int("index")?;
                let value = arg(&mut slots, 1);
                self.note_stored(&Val::List(Rc::clone(items)), std::slice::from_ref(&value));
                let mut list = items.borrow_mut();
                let len = list.len() as i64;
                let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
                list.insert(at as usize, value);
                Ok(Val::None)
            }
            "index" | "count" | "remove" => {
                let mut slots = bind(name, &["value"], 1, args, kwargs)?;
                let value = arg(&mut slots, 0);
                let position = items.borrow().iter().position(|v| loose_eq(v, &value));
                match name {
                    "count" => {
                        let count = items.borrow().iter().filter(|v| loose_eq(v, &value)).count();
                        Ok(Val::Int(count as i64))
                    }
                    "index" => position
                        .map(|i| Val::Int(i as i64))
                        .ok_or_else(|| value_error(format!("{} is not in list", repr(&value)))),
                    _ => match position {
                        Some(i) => {
                            items.borrow_mut().remove(i);
                            Ok(Val::None)
                        }
                        None => Err(value_error("list.remove(x): x not in list")),
                    },
                }
            }
            _ => Err(RuntimeError::Attribute {
                type_name: "list".to_owned(),
                attr: name.to_owned(),
            }),
        }
    }
}

fn split_whitespace(text: &str, limit: Option<usize>) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if limit == Some(parts.len()) {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(&rest[..i]);
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

fn dict_method(
    d: &Rc<RefCell<Dict>>,
    name: &'static str,
    args: Vec<Val>,
    kwargs: Vec<(String, Val)>,
) -> Result<Val, RuntimeError> {
    if name == "get" {
        let mut slots = bind(name, &["key", "default"], 1, args, kwargs)?;
        let key = arg(&mut slots, 0);
        let found = d.borrow().get(&key)?.cloned();
        return Ok(found.unwrap_or_else(|| arg(&mut slots, 1)));
    }
    bind(name, &[], 0, args, kwargs)?;
    let dict = d.borrow();
    Ok(Val::list(match name {
        "keys" => dict.keys().cloned().collect(),
        "values" => dict.values().cloned().collect(),
        _ => dict
            .iter()
            .map(|(k, v)| Val::tuple(vec![k.clone(), v.clone()]))
            .collect(),
    }))
}

fn datetime_method(
    dt: &NaiveDateTime,
    name: &'static str,
    args: Vec<Val>,
    kwargs: Vec<(String, Val)>,
) -> Result<Val, RuntimeError> {
    match name {
        "isoformat" => {
            let slots = bind(name, &["sep"], 0, args, kwargs)?;
            let sep = match given(&slots[0]) {
                Some(v) => v.expect_str("isoformat: sep")?.chars().next().unwrap_or('T'),
                None => 'T',
            };
            Ok(Val::str(datetime_str(dt, sep)))
        }
        "weekday" => {
            bind(name, &[], 0, args, kwargs)?;
            Ok(Val::Int(i64::from(dt.weekday().num_days_from_monday())))
        }
        "strftime" => {
            let mut slots = bind(name, &["format"], 1, args, kwargs)?;
            let format = arg(&mut slots, 0).expect_str("strftime: format")?;
            strftime(dt, &format).map(Val::str)
        }
        _ => {
            bind(name, &[], 0, args, kwargs)?;
            Ok(Val::Float(dt.and_utc().timestamp_micros() as f64 / 1_000_000.0))
        }
    }
}

fn parse_iso(text: &str) -> Result<NaiveDateTime, RuntimeError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| value_error(format!("Invalid isoformat string: {}", repr(&Val::str(text)))))
}

fn round(number: &Val, ndigits: Option<i64>) -> Result<Val, RuntimeError> {
    match (number, ndigits) {
        (Val::Float(f), None) => float_to_int(f.round_ties_even()).map(Val::Int),
        (Val::Float(f), Some(n)) => {
            let n = i32::try_from(n.clamp(-308, 308)).unwrap_or(0);
            let scale = 10f64.powi(n);
            let rounded = (f * scale).round_ties_even() / scale;
            Ok(Val::Float(if rounded.is_finite() { rounded } else { *f }))
        }
        (v, digits) => {
            let i = v.as_int().ok_or_else(|| {
                type_error(format!(
                    "type {} doesn't define __round__ method",
                    v.type_name()
                ))
            })?;
            match digits {
                Some(n) if n < 0 => {
                    let scale = u32::try_from(-n)
                        .ok()
                        .and_then(|e| 10i64.checked_pow(e));
                    Ok(Val::Int(match scale {
                        Some(scale) => {
                            let rounded = (i as f64 / scale as f64).round_ties_even();
                            (rounded as i64).checked_mul(scale).ok_or(RuntimeError::Overflow)?
                        }
                        None => 0,
                    }))
                }
                _ => Ok(Val::Int(i)),
            }
        }
    }
}
