//! Action-prefix transforms for field retrieval
//!
//! A query may carry `:`-separated action prefixes ahead of its path;
//! each names a transform applied to the retrieved value. Applying a
//! transform to a value it is not defined for fails the whole
//! resolution.

use crate::error::ResolveError;
use crate::value::Value;

/// Apply one named action to a scalar value.
pub fn action_value(value: &Value, action: &str) -> Result<Value, ResolveError> {
    if action.is_empty() {
        return Ok(value.clone());
    }

    // type casting
    if action == "int" {
        return cast_int(value).ok_or_else(|| invalid(action, value, "not an integer"));
    }
    if action == "float" {
        return cast_float(value).ok_or_else(|| invalid(action, value, "not a number"));
    }
    if action == "str" {
        return Ok(Value::Str(value.to_string()));
    }

    // formatting
    if let Some(spec) = action.strip_prefix("format") {
        return format_value(value, spec);
    }

    // operations
    if let Some(par) = action.strip_prefix("scale") {
        let exp: i32 = par
            .parse()
            .map_err(|_| ResolveError::UnknownAction(action.to_string()))?;
        return match value {
            Value::Int(i) if exp >= 0 => Ok(Value::Int(i * 10i64.pow(exp as u32))),
            Value::Int(i) => Ok(Value::Float(*i as f64 / 10f64.powi(-exp))),
            Value::Float(f) => Ok(Value::Float(f * 10f64.powi(exp))),
            _ => Err(invalid(action, value, "value must be a numeral")),
        };
    }
    if let Some(par) = action.strip_prefix("mult") {
        let k: f64 = par
            .parse()
            .map_err(|_| ResolveError::UnknownAction(action.to_string()))?;
        let v = value
            .as_f64()
            .ok_or_else(|| invalid(action, value, "value must be a numeral"))?;
        return Ok(Value::Float(v * k));
    }
    if let Some(par) = action.strip_prefix("div") {
        let k: f64 = par
            .parse()
            .map_err(|_| ResolveError::UnknownAction(action.to_string()))?;
        let v = value
            .as_f64()
            .ok_or_else(|| invalid(action, value, "value must be a numeral"))?;
        return Ok(Value::Float(v / k));
    }
    if let Some(par) = action.strip_prefix("round") {
        let v = value
            .as_f64()
            .ok_or_else(|| invalid(action, value, "value must be a numeral"))?;
        return if par.is_empty() {
            Ok(Value::Int(v.round() as i64))
        } else {
            let digits: i32 = par
                .parse()
                .map_err(|_| ResolveError::UnknownAction(action.to_string()))?;
            let k = 10f64.powi(digits);
            Ok(Value::Float((v * k).round() / k))
        };
    }

    Err(ResolveError::UnknownAction(action.to_string()))
}

fn invalid(action: &str, value: &Value, message: &str) -> ResolveError {
    ResolveError::InvalidAction {
        action: action.to_string(),
        value: value.type_name().to_string(),
        message: message.to_string(),
    }
}

fn cast_int(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Float(f) => Some(Value::Int(f.trunc() as i64)),
        Value::Bool(b) => Some(Value::Int(*b as i64)),
        Value::Str(s) => s.trim().parse::<i64>().ok().map(Value::Int),
        _ => None,
    }
}

fn cast_float(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Float(*i as f64)),
        Value::Float(f) => Some(Value::Float(*f)),
        Value::Str(s) => s.trim().parse::<f64>().ok().map(Value::Float),
        _ => None,
    }
}

/// Formatting mini-language: `[[fill]align]['0'][width]['.'precision][type]`
/// with align one of `<`, `>`, `^` and type one of `d`, `f`, `e`, `x`, `s`.
fn format_value(value: &Value, spec: &str) -> Result<Value, ResolveError> {
    let parsed = FormatSpec::parse(spec)
        .ok_or_else(|| ResolveError::BadFormatSpec(spec.to_string()))?;
    let bad = |msg: &str| invalid(&format!("format{}", spec), value, msg);

    let body = match parsed.kind {
        Some('d') => match value {
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => (*b as i64).to_string(),
            _ => return Err(bad("'d' needs an integer")),
        },
        Some('x') => match value {
            Value::Int(i) => format!("{:x}", i),
            _ => return Err(bad("'x' needs an integer")),
        },
        Some('f') => {
            let v = value.as_f64().ok_or_else(|| bad("'f' needs a number"))?;
            format!("{:.*}", parsed.precision.unwrap_or(6), v)
        }
        Some('e') => {
            let v = value.as_f64().ok_or_else(|| bad("'e' needs a number"))?;
            format!("{:.*e}", parsed.precision.unwrap_or(6), v)
        }
        Some('s') | None => {
            let mut s = value.to_string();
            if let Some(prec) = parsed.precision {
                s.truncate(s.char_indices().map(|(i, _)| i).nth(prec).unwrap_or(s.len()));
            }
            s
        }
        Some(other) => return Err(ResolveError::BadFormatSpec(format!("{}{}", spec, other))),
    };

    let width = parsed.width.unwrap_or(0);
    if body.chars().count() >= width {
        return Ok(Value::Str(body));
    }
    let pad = width - body.chars().count();
    let numeric = matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let fill = parsed.fill;
    let padded = match parsed.align.unwrap_or(if numeric { '>' } else { '<' }) {
        '<' => format!("{}{}", body, fill.to_string().repeat(pad)),
        '>' => format!("{}{}", fill.to_string().repeat(pad), body),
        '^' => {
            let left = pad / 2;
            format!(
                "{}{}{}",
                fill.to_string().repeat(left),
                body,
                fill.to_string().repeat(pad - left)
            )
        }
        _ => body,
    };
    Ok(Value::Str(padded))
}

struct FormatSpec {
    fill: char,
    align: Option<char>,
    width: Option<usize>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<FormatSpec> {
        let chars: Vec<char> = spec.chars().collect();
        let mut pos = 0;
        let mut fill = ' ';
        let mut align = None;

        if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
            fill = chars[0];
            align = Some(chars[1]);
            pos = 2;
        } else if !chars.is_empty() && matches!(chars[0], '<' | '>' | '^') {
            align = Some(chars[0]);
            pos = 1;
        }

        if chars.get(pos) == Some(&'0') {
            fill = '0';
            align.get_or_insert('>');
            pos += 1;
        }

        let width_start = pos;
        while chars.get(pos).is_some_and(|c| c.is_ascii_digit()) {
            pos += 1;
        }
        let width = if pos > width_start {
            Some(chars[width_start..pos].iter().collect::<String>().parse().ok()?)
        } else {
            None
        };

        let mut precision = None;
        if chars.get(pos) == Some(&'.') {
            pos += 1;
            let prec_start = pos;
            while chars.get(pos).is_some_and(|c| c.is_ascii_digit()) {
                pos += 1;
            }
            if pos == prec_start {
                return None;
            }
            precision = Some(chars[prec_start..pos].iter().collect::<String>().parse().ok()?);
        }

        let kind = chars.get(pos).copied();
        if kind.is_some() && pos + 1 != chars.len() {
            return None;
        }

        Some(FormatSpec {
            fill,
            align,
            width,
            precision,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casts() {
        assert_eq!(action_value(&Value::Str(" 42 ".into()), "int").unwrap(), Value::Int(42));
        assert_eq!(action_value(&Value::Float(2.9), "int").unwrap(), Value::Int(2));
        assert_eq!(action_value(&Value::Int(3), "float").unwrap(), Value::Float(3.0));
        assert_eq!(action_value(&Value::Int(3), "str").unwrap(), Value::Str("3".into()));
    }

    #[test]
    fn misapplied_cast_fails() {
        assert!(action_value(&Value::Str("abc".into()), "int").is_err());
        assert!(action_value(&Value::Null, "float").is_err());
    }

    #[test]
    fn scale_is_power_of_ten() {
        assert_eq!(action_value(&Value::Int(2), "scale3").unwrap(), Value::Int(2000));
        assert_eq!(action_value(&Value::Int(2300), "scale-3").unwrap(), Value::Float(2.3));
        assert_eq!(action_value(&Value::Float(0.03), "scale3").unwrap(), Value::Float(30.0));
        assert!(action_value(&Value::Str("x".into()), "scale3").is_err());
    }

    #[test]
    fn mult_div_round() {
        assert_eq!(action_value(&Value::Int(4), "mult2.5").unwrap(), Value::Float(10.0));
        assert_eq!(action_value(&Value::Int(5), "div2").unwrap(), Value::Float(2.5));
        assert_eq!(action_value(&Value::Float(2.3456), "round2").unwrap(), Value::Float(2.35));
        assert_eq!(action_value(&Value::Float(2.6), "round").unwrap(), Value::Int(3));
    }

    #[test]
    fn unknown_action_is_error() {
        assert!(matches!(
            action_value(&Value::Int(1), "cube"),
            Err(ResolveError::UnknownAction(_))
        ));
    }

    #[test]
    fn format_precision_and_width() {
        assert_eq!(
            action_value(&Value::Float(2.998), "format.2f").unwrap(),
            Value::Str("3.00".into())
        );
        assert_eq!(
            action_value(&Value::Int(7), "format03d").unwrap(),
            Value::Str("007".into())
        );
        assert_eq!(
            action_value(&Value::Str("ab".into()), "format4").unwrap(),
            Value::Str("ab  ".into())
        );
        assert_eq!(
            action_value(&Value::Int(7), "format4").unwrap(),
            Value::Str("   7".into())
        );
    }

    #[test]
    fn format_type_mismatch_fails() {
        assert!(action_value(&Value::Float(2.5), "formatd").is_err());
        assert!(action_value(&Value::Str("x".into()), "format.1f").is_err());
    }
}
