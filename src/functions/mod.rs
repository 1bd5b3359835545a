//! The built-in function table invoked from `{{ name(arg, ...) }}` substitutions.
//!
//! Functions are pure: same arguments always produce the same result (aside
//! from `random_*` and `timestamp`, which are intentionally non-deterministic
//! sources). Each takes already-resolved [`serde_json::Value`] arguments and
//! returns a `Value`; the substitution engine stringifies the result.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("unknown function '{0}'")]
    Unknown(String),
    #[error("{0} expects {1} argument(s), got {2}")]
    Arity(&'static str, usize, usize),
    #[error("{0}: invalid argument: {1}")]
    InvalidArgument(&'static str, String),
}

/// Stringifies a value the way `Context::substitute` does: strings pass
/// through verbatim, everything else gets its natural/JSON form.
pub fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn call(name: &str, args: &[Value]) -> Result<Value, FunctionError> {
    match name {
        "base64_encode" => {
            let s = string_arg(name, args, 0)?;
            Ok(Value::String(BASE64.encode(s.as_bytes())))
        }
        "base64_decode" => {
            let s = string_arg(name, args, 0)?;
            let bytes = BASE64
                .decode(s.as_bytes())
                .map_err(|e| FunctionError::InvalidArgument(name, e.to_string()))?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
        "url_encode" => {
            let s = string_arg(name, args, 0)?;
            Ok(Value::String(urlencoding::encode(&s).into_owned()))
        }
        "url_decode" => {
            let s = string_arg(name, args, 0)?;
            let decoded = urlencoding::decode(&s)
                .map_err(|e| FunctionError::InvalidArgument(name, e.to_string()))?;
            Ok(Value::String(decoded.into_owned()))
        }
        "json_encode" => {
            let v = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::String(
                serde_json::to_string(&v).map_err(|e| FunctionError::InvalidArgument(name, e.to_string()))?,
            ))
        }
        "json_decode" => {
            let s = string_arg(name, args, 0)?;
            serde_json::from_str(&s).map_err(|e| FunctionError::InvalidArgument(name, e.to_string()))
        }
        "json_escape" => {
            let s = string_arg(name, args, 0)?;
            let encoded = serde_json::to_string(&Value::String(s))
                .map_err(|e| FunctionError::InvalidArgument(name, e.to_string()))?;
            Ok(Value::String(encoded[1..encoded.len() - 1].to_string()))
        }
        "html_escape" => {
            let s = string_arg(name, args, 0)?;
            Ok(Value::String(html_escape(&s)))
        }
        "md5" => {
            let s = string_arg(name, args, 0)?;
            Ok(Value::String(format!("{:x}", md5::compute(s.as_bytes()))))
        }
        "sha1" => {
            let s = string_arg(name, args, 0)?;
            use sha1::Digest as _;
            let mut hasher = sha1::Sha1::new();
            hasher.update(s.as_bytes());
            Ok(Value::String(hex::encode(hasher.finalize())))
        }
        "sha256" => {
            let s = string_arg(name, args, 0)?;
            let mut hasher = Sha256::new();
            hasher.update(s.as_bytes());
            Ok(Value::String(hex::encode(hasher.finalize())))
        }
        "concat" => {
            if args.is_empty() {
                return Err(FunctionError::Arity(name, 1, 0));
            }
            Ok(Value::String(args.iter().map(stringify).collect()))
        }
        "length" => {
            let len = match args.first() {
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                Some(v) => stringify(v).chars().count(),
                None => 0,
            };
            Ok(Value::Number(len.into()))
        }
        "substring" => substring(name, args),
        "replace" => {
            let s = string_arg(name, args, 0)?;
            let old = string_arg(name, args, 1)?;
            let new = string_arg(name, args, 2)?;
            Ok(Value::String(s.replace(&old, &new)))
        }
        "random_int" => {
            let min = int_arg(name, args, 0)?;
            let max = int_arg(name, args, 1)?;
            if max < min {
                return Err(FunctionError::InvalidArgument(name, format!("max ({max}) < min ({min})")));
            }
            let value = rand::thread_rng().gen_range(min..=max);
            Ok(Value::Number(value.into()))
        }
        "random_string" => {
            let len = int_arg(name, args, 0)?;
            if len <= 0 {
                return Ok(Value::String(String::new()));
            }
            let charset = args
                .get(1)
                .map(stringify)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789".to_string());
            let chars: Vec<char> = charset.chars().collect();
            let mut rng = rand::thread_rng();
            let s: String = (0..len as usize)
                .map(|_| chars[rng.gen_range(0..chars.len())])
                .collect();
            Ok(Value::String(s))
        }
        "timestamp" => {
            let fmt = args.first().map(stringify).unwrap_or_else(|| "s".to_string());
            let now = Utc::now();
            Ok(Value::String(match fmt.as_str() {
                "ms" => now.timestamp_millis().to_string(),
                "ns" => now
                    .timestamp_nanos_opt()
                    .unwrap_or_else(|| now.timestamp() * 1_000_000_000)
                    .to_string(),
                "rfc3339" | "iso8601" => now.to_rfc3339(),
                _ => now.timestamp().to_string(),
            }))
        }
        "format_date" => format_date(name, args),
        _ => Err(FunctionError::Unknown(name.to_string())),
    }
}

fn string_arg(name: &'static str, args: &[Value], idx: usize) -> Result<String, FunctionError> {
    args.get(idx)
        .map(stringify)
        .ok_or(FunctionError::Arity(name, idx + 1, args.len()))
}

fn int_arg(name: &'static str, args: &[Value], idx: usize) -> Result<i64, FunctionError> {
    let s = string_arg(name, args, idx)?;
    s.trim()
        .parse::<i64>()
        .map_err(|_| FunctionError::InvalidArgument(name, format!("'{s}' is not an integer")))
}

fn substring(name: &'static str, args: &[Value]) -> Result<Value, FunctionError> {
    let s = string_arg(name, args, 0)?;
    let bytes = s.as_bytes();
    let len = bytes.len() as i64;
    let start = int_arg(name, args, 1)?;
    let end = match args.get(2) {
        Some(v) => stringify(v)
            .trim()
            .parse::<i64>()
            .map_err(|_| FunctionError::InvalidArgument(name, "end is not an integer".into()))?,
        None => len,
    };

    let start = start.max(0);
    if start >= len {
        return Ok(Value::String(String::new()));
    }
    let end = end.min(len);
    if end < start {
        return Ok(Value::String(String::new()));
    }
    let slice = &bytes[start as usize..end as usize];
    Ok(Value::String(String::from_utf8_lossy(slice).into_owned()))
}

fn format_date(name: &'static str, args: &[Value]) -> Result<Value, FunctionError> {
    let when = string_arg(name, args, 0)?;
    let fmt = args.get(1).map(stringify).unwrap_or_else(|| "rfc3339".to_string());

    let dt: DateTime<Utc> = if let Ok(epoch) = when.trim().parse::<i64>() {
        DateTime::<Utc>::from_timestamp(epoch, 0)
            .ok_or_else(|| FunctionError::InvalidArgument(name, format!("invalid epoch '{when}'")))?
    } else if let Ok(parsed) = DateTime::parse_from_rfc3339(&when) {
        parsed.with_timezone(&Utc)
    } else if let Ok(date) = NaiveDate::parse_from_str(&when, "%Y-%m-%d") {
        DateTime::<Utc>::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap(), Utc)
    } else {
        return Err(FunctionError::InvalidArgument(name, format!("unparseable date '{when}'")));
    };

    Ok(Value::String(match fmt.as_str() {
        "rfc3339" | "iso8601" => dt.to_rfc3339(),
        "date" => dt.format("%Y-%m-%d").to_string(),
        "time" => dt.format("%H:%M:%S").to_string(),
        "datetime" => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        custom => dt.format(custom).to_string(),
    }))
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn base64_round_trips() {
        let encoded = call("base64_encode", &[s("hello")]).unwrap();
        assert_eq!(encoded, s("aGVsbG8="));
        let decoded = call("base64_decode", &[encoded]).unwrap();
        assert_eq!(decoded, s("hello"));
    }

    #[test]
    fn url_round_trips() {
        let encoded = call("url_encode", &[s("a b&c")]).unwrap();
        let decoded = call("url_decode", &[encoded]).unwrap();
        assert_eq!(decoded, s("a b&c"));
    }

    #[test]
    fn json_round_trips_structured_values() {
        let v = serde_json::json!({"a": 1, "b": [1,2,3]});
        let encoded = call("json_encode", &[v.clone()]).unwrap();
        let decoded = call("json_decode", &[encoded]).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn md5_sha1_sha256_produce_lowercase_hex() {
        assert_eq!(call("md5", &[s("abc")]).unwrap(), s("900150983cd24fb0d6963f7d28e17f72"));
        assert_eq!(
            call("sha1", &[s("abc")]).unwrap(),
            s("a9993e364706816aba3e25717850c26c9cd0d89")
        );
        assert_eq!(
            call("sha256", &[s("abc")]).unwrap(),
            s("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn substring_handles_boundaries() {
        assert_eq!(call("substring", &[s("abc"), Value::from(5)]).unwrap(), s(""));
        assert_eq!(
            call("substring", &[s("abc"), Value::from(-1), Value::from(2)]).unwrap(),
            s("ab")
        );
        assert_eq!(
            call("substring", &[s("abc"), Value::from(2), Value::from(100)]).unwrap(),
            s("c")
        );
    }

    #[test]
    fn random_int_rejects_inverted_range() {
        assert!(call("random_int", &[Value::from(5), Value::from(4)]).is_err());
        let v = call("random_int", &[Value::from(5), Value::from(5)]).unwrap();
        assert_eq!(v, Value::from(5));
    }

    #[test]
    fn length_dispatches_on_value_kind() {
        assert_eq!(call("length", &[s("hello")]).unwrap(), Value::from(5));
        assert_eq!(
            call("length", &[serde_json::json!([1, 2, 3])]).unwrap(),
            Value::from(3)
        );
    }

    #[test]
    fn unknown_function_errors() {
        assert!(call("does_not_exist", &[]).is_err());
    }
}
