//! Text rendering of script values: `str()`, `repr()` and f-string format specs.

use std::fmt::{self, Write as _};
use std::rc::Rc;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDateTime, TimeDelta, Timelike};

use super::error::RuntimeError;
use super::value::Val;

const MICROS_PER_DAY: i64 = 86_400_000_000;

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&repr(self))
    }
}

/// `str(v)`
pub(crate) fn to_str(v: &Val) -> String {
    match v {
        Val::Str(s) => s.to_string(),
        Val::DateTime(dt) => datetime_str(dt, ' '),
        Val::TimeDelta(td) => timedelta_str(*td),
        other => repr(other),
    }
}

/// `repr(v)`
pub(crate) fn repr(v: &Val) -> String {
    let mut out = String::new();
    write_repr(v, &mut out, &mut Vec::new());
    out
}

fn write_repr(v: &Val, out: &mut String, seen: &mut Vec<*const ()>) {
    match v {
        Val::None => out.push_str("None"),
        Val::Bool(true) => out.push_str("True"),
        Val::Bool(false) => out.push_str("False"),
        Val::Int(i) => out.push_str(&i.to_string()),
        Val::Float(f) => out.push_str(&float_repr(*f)),
        Val::Str(s) => out.push_str(&quote(s)),
        Val::List(items) => {
            let ptr = Rc::as_ptr(items).cast::<()>();
            if seen.contains(&ptr) {
                out.push_str("[...]");
                return;
            }
            seen.push(ptr);
            out.push('[');
            write_items(&items.borrow(), out, seen);
            out.push(']');
            seen.pop();
        }
        Val::Tuple(items) => {
            out.push('(');
            write_items(items, out, seen);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Val::Dict(d) => {
            let ptr = Rc::as_ptr(d).cast::<()>();
            if seen.contains(&ptr) {
                out.push_str("{...}");
                return;
            }
            seen.push(ptr);
            out.push('{');
            for (i, (k, v)) in d.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, seen);
                out.push_str(": ");
                write_repr(v, out, seen);
            }
            out.push('}');
            seen.pop();
        }
        Val::Range { start, stop, step } => {
            if *step == 1 {
                let _ = write!(out, "range({start}, {stop})");
            } else {
                let _ = write!(out, "range({start}, {stop}, {step})");
            }
        }
        Val::DateTime(dt) => {
            let _ = write!(
                out,
                "datetime.datetime({}, {}, {}, {}, {}",
                chrono::Datelike::year(dt),
                chrono::Datelike::month(dt),
                chrono::Datelike::day(dt),
                dt.hour(),
                dt.minute()
            );
            let micros = micros_of(dt);
            if dt.second() != 0 || micros != 0 {
                let _ = write!(out, ", {}", dt.second());
            }
            if micros != 0 {
                let _ = write!(out, ", {micros}");
            }
            out.push(')');
        }
        Val::TimeDelta(td) => {
            let (days, seconds, micros) = timedelta_parts(*td);
            let fields: Vec<String> = [("days", days), ("seconds", seconds), ("microseconds", micros)]
                .into_iter()
                .filter(|(_, n)| *n != 0)
                .map(|(name, n)| format!("{name}={n}"))
                .collect();
            if fields.is_empty() {
                out.push_str("datetime.timedelta(0)");
            } else {
                let _ = write!(out, "datetime.timedelta({})", fields.join(", "));
            }
        }
        Val::Function(func) => {
            let _ = write!(out, "<function {}>", func.def.name);
        }
        Val::Builtin(b) => {
            let _ = write!(out, "<built-in function {}>", b.name());
        }
        Val::Method(m) => {
            let _ = write!(out, "<bound method {}.{}>", m.receiver.type_name(), m.name);
        }
        Val::Object(o) => {
            let _ = write!(out, "<{} object>", o.type_name);
        }
        Val::Api => out.push_str("<LawAPI object>"),
    }
}

fn write_items(items: &[Val], out: &mut String, seen: &mut Vec<*const ()>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out, seen);
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c == '\x7f' => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        return padded_exponent(&format!("{f:e}"));
    }
    let s = f.to_string();
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Rewrite Rust's `1.5e-5` exponent into `1.5e-05`.
fn padded_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s.to_owned(),
    }
}

fn micros_of(dt: &NaiveDateTime) -> u32 {
    (dt.nanosecond() % 1_000_000_000) / 1_000
}

pub(crate) fn datetime_str(dt: &NaiveDateTime, separator: char) -> String {
    let mut out = format!("{}{separator}{}", dt.format("%Y-%m-%d"), dt.format("%H:%M:%S"));
    let micros = micros_of(dt);
    if micros != 0 {
        let _ = write!(out, ".{micros:06}");
    }
    out
}

/// Normalized `(days, seconds, microseconds)` with `0 <= seconds < 86400`.
pub(crate) fn timedelta_parts(td: TimeDelta) -> (i64, i64, i64) {
    let micros = td
        .num_microseconds()
        .unwrap_or_else(|| td.num_seconds().saturating_mul(1_000_000));
    let days = micros.div_euclid(MICROS_PER_DAY);
    let rest = micros.rem_euclid(MICROS_PER_DAY);
    (days, rest / 1_000_000, rest % 1_000_000)
}

fn timedelta_str(td: TimeDelta) -> String {
    let (days, seconds, micros) = timedelta_parts(td);
    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        let _ = write!(out, "{days} day{plural}, ");
    }
    let _ = write!(out, "{}:{:02}:{:02}", seconds / 3600, seconds % 3600 / 60, seconds % 60);
    if micros != 0 {
        let _ = write!(out, ".{micros:06}");
    }
    out
}

pub(crate) fn strftime(dt: &NaiveDateTime, fmt: &str) -> Result<String, RuntimeError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(RuntimeError::Value(format!("invalid format string '{fmt}'")));
    }
    let mut out = String::new();
    write!(out, "{}", dt.format_with_items(items.into_iter()))
        .map_err(|_| RuntimeError::Value(format!("cannot format datetime with '{fmt}'")))?;
    Ok(out)
}

struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<Spec, RuntimeError> {
    let invalid = || RuntimeError::Value(format!("invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    let mut parsed = Spec {
        fill: ' ',
        align: None,
        sign: '-',
        width: 0,
        grouping: None,
        precision: None,
        kind: None,
    };
    let mut i = 0;
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = chars[0];
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = c;
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        if parsed.align.is_none() {
            parsed.fill = '0';
            parsed.align = Some('=');
        }
        i += 1;
    }
    let digits = |i: &mut usize| -> Result<Option<usize>, RuntimeError> {
        let start = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        if *i == start {
            return Ok(None);
        }
        chars[start..*i]
            .iter()
            .collect::<String>()
            .parse()
            .map(Some)
            .map_err(|_| invalid())
    };
    parsed.width = digits(&mut i)?.unwrap_or(0);
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            parsed.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        parsed.precision = Some(digits(&mut i)?.ok_or_else(|| {
            RuntimeError::Value("format specifier missing precision".to_owned())
        })?);
    }
    match chars.len() - i {
        0 => {}
        1 => parsed.kind = Some(chars[i]),
        _ => return Err(invalid()),
    }
    Ok(parsed)
}

/// Apply a format spec the way `format(v, spec)` does for the supported types.
pub(crate) fn format_spec(v: &Val, spec: &str) -> Result<String, RuntimeError> {
    if spec.is_empty() {
        return Ok(to_str(v));
    }
    if let Val::DateTime(dt) = v {
        return strftime(dt, spec);
    }
    let parsed = parse_spec(spec)?;
    let unknown = || {
        RuntimeError::Value(format!(
            "unknown format code '{}' for object of type '{}'",
            parsed.kind.unwrap_or('s'),
            v.type_name()
        ))
    };

    let (negative, body, numeric) = match (v, parsed.kind) {
        (Val::Str(text), None | Some('s')) => {
            let text = match parsed.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text.to_string(),
            };
            (false, text, false)
        }
        (Val::Bool(_) | Val::Int(_), None | Some('d')) => {
            if parsed.precision.is_some() {
                return Err(RuntimeError::Value(
                    "precision not allowed in integer format specifier".to_owned(),
                ));
            }
            let i = v.as_int().ok_or_else(unknown)?;
            let digits = group(&i.unsigned_abs().to_string(), parsed.grouping);
            (i < 0, digits, true)
        }
        (Val::Bool(_) | Val::Int(_) | Val::Float(_), kind) => {
            let f = v.as_f64().ok_or_else(unknown)?;
            let body = float_body(f.abs(), kind, parsed.precision).ok_or_else(unknown)?;
            let body = match body.split_once('.') {
                Some((int, frac)) => format!("{}.{frac}", group(int, parsed.grouping)),
                None => group(&body, parsed.grouping),
            };
            (f.is_sign_negative() && !f.is_nan(), body, true)
        }
        _ => return Err(unknown()),
    };

    let sign = match (negative, parsed.sign) {
        (true, _) => "-",
        (false, '+') if numeric => "+",
        (false, ' ') if numeric => " ",
        _ => "",
    };
    let len = sign.chars().count() + body.chars().count();
    let pad = parsed.width.saturating_sub(len);
    let fill = |n: usize| std::iter::repeat(parsed.fill).take(n).collect::<String>();
    let align = parsed.align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{sign}{body}{}", fill(pad)),
        '^' => format!("{}{sign}{body}{}", fill(pad / 2), fill(pad - pad / 2)),
        '=' => format!("{sign}{}{body}", fill(pad)),
        _ => format!("{}{sign}{body}", fill(pad)),
    })
}

fn float_body(abs: f64, kind: Option<char>, precision: Option<usize>) -> Option<String> {
    if !abs.is_finite() {
        let text = if abs.is_nan() { "nan" } else { "inf" };
        return Some(match kind {
            Some('%') => format!("{text}%"),
            Some(c) if c.is_ascii_uppercase() => text.to_ascii_uppercase(),
            _ => text.to_owned(),
        });
    }
    Some(match kind {
        Some('f' | 'F') => format!("{abs:.*}", precision.unwrap_or(6)),
        Some('%') => format!("{:.*}%", precision.unwrap_or(6), abs * 100.0),
        Some('e') => padded_exponent(&format!("{abs:.*e}", precision.unwrap_or(6))),
        Some('E') => padded_exponent(&format!("{abs:.*e}", precision.unwrap_or(6))).to_ascii_uppercase(),
        Some('g') => general(abs, precision.unwrap_or(6)),
        Some('G') => general(abs, precision.unwrap_or(6)).to_ascii_uppercase(),
        None => match precision {
            Some(p) => general(abs, p),
            None => float_repr(abs),
        },
        Some(_) => return None,
    })
}

/// The `g` presentation: significant digits, trailing zeros removed.
fn general(abs: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if abs == 0.0 {
        return "0".to_owned();
    }
    let scientific = format!("{abs:.*e}", precision - 1);
    let exponent: i64 = scientific
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exponent < -4 || exponent >= precision as i64 {
        let (mantissa, _) = scientific.split_once('e').unwrap_or((&scientific, ""));
        let mantissa = trim_fraction(mantissa);
        return padded_exponent(&format!("{mantissa}e{exponent}"));
    }
    let decimals = usize::try_from(precision as i64 - 1 - exponent).unwrap_or(0);
    trim_fraction(&format!("{abs:.decimals$}")).to_owned()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn group(digits: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return digits.to_owned();
    };
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return digits.to_owned();
    }
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn float_reprs() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn container_reprs() {
        let list = Val::list(vec![Val::Int(1), Val::str("it's"), Val::None]);
        assert_eq!(repr(&list), "[1, \"it's\", None]");
        assert_eq!(repr(&Val::tuple(vec![Val::Bool(true)])), "(True,)");
        let Val::List(inner) = &list else { unreachable!() };
        inner.borrow_mut().push(list.clone());
        assert_eq!(repr(&list), "[1, \"it's\", None, [...]]");
    }

    #[test]
    fn string_quoting() {
        assert_eq!(repr(&Val::str("a'b\"c\n")), "'a\\'b\"c\\n'");
        assert_eq!(to_str(&Val::str("plain")), "plain");
    }

    #[test]
    fn datetime_text() {
        let value = Val::DateTime(dt(2024, 3, 5, 14, 0, 0));
        assert_eq!(to_str(&value), "2024-03-05 14:00:00");
        assert_eq!(repr(&value), "datetime.datetime(2024, 3, 5, 14, 0)");
        assert_eq!(format_spec(&value, "%d.%m.%Y").unwrap(), "05.03.2024");
        assert!(format_spec(&value, "%Q").is_err());
    }

    #[test]
    fn timedelta_text() {
        assert_eq!(to_str(&Val::TimeDelta(TimeDelta::seconds(90_061))), "1 day, 1:01:01");
        assert_eq!(to_str(&Val::TimeDelta(TimeDelta::seconds(-1))), "-1 day, 23:59:59");
        assert_eq!(to_str(&Val::TimeDelta(TimeDelta::milliseconds(1500))), "0:00:01.500000");
        assert_eq!(repr(&Val::TimeDelta(TimeDelta::zero())), "datetime.timedelta(0)");
    }

    #[test]
    fn numeric_specs() {
        assert_eq!(format_spec(&Val::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_spec(&Val::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_spec(&Val::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_spec(&Val::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_spec(&Val::Int(7), "+").unwrap(), "+7");
        assert_eq!(format_spec(&Val::Float(12345.678), ",.1f").unwrap(), "12,345.7");
        assert_eq!(format_spec(&Val::Float(0.000012345), ".3g").unwrap(), "1.23e-05");
        assert_eq!(format_spec(&Val::Float(1234.5), "e").unwrap(), "1.234500e+03");
    }

    #[test]
    fn alignment() {
        assert_eq!(format_spec(&Val::str("ab"), ">5").unwrap(), "   ab");
        assert_eq!(format_spec(&Val::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_spec(&Val::str("ab"), "5").unwrap(), "ab   ");
        assert_eq!(format_spec(&Val::Int(3), "4").unwrap(), "   3");
        assert_eq!(format_spec(&Val::str("abcdef"), ".3").unwrap(), "abc");
    }

    #[test]
    fn spec_errors() {
        assert!(format_spec(&Val::str("x"), "d").is_err());
        assert!(format_spec(&Val::Int(1), ".2").is_err());
        assert!(format_spec(&Val::None, ">3").is_err());
    }
}
