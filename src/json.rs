//! JSON front end: arrays are lists, numbers are numbers and strings are identifiers.
//!
//! ```json
//! ["defn", "square", ["x"], ["native.i64.mul", "x", "x"]]
//! ```
//!
//! Objects, booleans and `null` have no IR representation and are rejected.

use crate::ast::Value;
use crate::{Error, EvalError, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Parse a JSON document into an IR value tree
pub fn parse_json(input: &str) -> Result<Value, ParseError> {
    let json: serde_json::Value = serde_json::from_str(input).map_err(|e| {
        let kind = if e.is_eof() {
            ParseErrorKind::Incomplete
        } else {
            ParseErrorKind::InvalidSyntax
        };
        ParseError::from_message(kind, format!("Invalid JSON: {e}"))
    })?;

    json_to_value(json, 0)
}

fn json_to_value(json: serde_json::Value, depth: usize) -> Result<Value, ParseError> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(ParseError::from_message(
            ParseErrorKind::TooDeeplyNested,
            format!("JSON expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        ));
    }
    match json {
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).ok_or_else(|| {
            ParseError::from_message(
                ParseErrorKind::Unsupported,
                format!("Number cannot be represented: {n}"),
            )
        }),
        serde_json::Value::String(s) => Ok(Value::Symbol(s)),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| json_to_value(item, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        other @ (serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Object(_)) => Err(ParseError::from_message(
            ParseErrorKind::Unsupported,
            format!("JSON value has no IR representation: {other}"),
        )),
    }
}

/// Render an IR value as JSON; integral numbers are written without a fraction
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, Error> {
    match value {
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
            Ok(serde_json::Value::from(*n as i64))
        }
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                EvalError::TypeMismatch {
                    expected: "finite number",
                    found: n.to_string(),
                }
                .into()
            }),
        Value::Symbol(s) => Ok(serde_json::Value::String(s.clone())),
        Value::List(items) => items
            .iter()
            .map(value_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Native(_) | Value::Function(_) | Value::Tail(_) => {
            Err(Error::type_mismatch("IR value", value))
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::Evaluator;
    use crate::ast::{nil, sym, val};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_json_data_driven() {
        let test_cases: Vec<(&str, Result<Value, ParseErrorKind>)> = vec![
            ("42", Ok(val(42))),
            ("-2.5", Ok(val(-2.5))),
            (r#""native.i64.add""#, Ok(sym("native.i64.add"))),
            ("[]", Ok(nil())),
            ("[1, 2.5, -3]", Ok(val(vec![val(1), val(2.5), val(-3)]))),
            (
                r#"["defn", "f", ["x"], "x"]"#,
                Ok(val(vec![sym("defn"), sym("f"), val([sym("x")]), sym("x")])),
            ),
            (r#"{"+": [1, 2]}"#, Err(ParseErrorKind::Unsupported)),
            ("true", Err(ParseErrorKind::Unsupported)),
            ("null", Err(ParseErrorKind::Unsupported)),
            ("[1, null]", Err(ParseErrorKind::Unsupported)),
            ("[1,", Err(ParseErrorKind::Incomplete)),
            ("[1 2]", Err(ParseErrorKind::InvalidSyntax)),
            ("[1] 2", Err(ParseErrorKind::InvalidSyntax)),
        ];

        for (i, (input, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("JSON test #{} '{input}'", i + 1);
            match (parse_json(input), expected) {
                (Ok(actual), Ok(expected)) => assert_eq!(actual, expected, "{test_id}"),
                (Err(err), Err(kind)) => assert_eq!(err.kind, kind, "{test_id}: {err}"),
                (Ok(actual), Err(kind)) => panic!("{test_id}: expected {kind:?}, got {actual:?}"),
                (Err(err), Ok(expected)) => {
                    panic!("{test_id}: expected {expected:?}, got error {err}")
                }
            }
        }
    }

    #[test]
    fn test_value_to_json() {
        let expr = val(vec![sym("+"), val(1), val(2.5), nil()]);
        assert_eq!(value_to_json(&expr).unwrap().to_string(), r#"["+",1,2.5,[]]"#);
        assert_eq!(value_to_json(&val(-7)).unwrap().to_string(), "-7");

        let native = Evaluator::new().eval(&sym("native.i64.add")).unwrap();
        assert_eq!(value_to_json(&native).unwrap_err().code(), "TYPE_MISMATCH");
        assert_eq!(
            value_to_json(&val(f64::NAN)).unwrap_err().code(),
            "TYPE_MISMATCH"
        );
    }

    #[test]
    fn test_json_programs_evaluate() {
        let mut evaluator = Evaluator::new();
        let definition =
            parse_json(r#"["defn", "square", ["x"], ["native.i64.mul", "x", "x"]]"#).unwrap();
        evaluator.eval(&definition).unwrap();

        let call = parse_json(r#"["square", ["+", 2, 3]]"#).unwrap();
        assert_eq!(evaluator.eval(&call).unwrap(), val(25));

        // rendered JSON reads back as the same tree
        let text = value_to_json(&definition).unwrap().to_string();
        assert_eq!(parse_json(&text).unwrap(), definition);
    }
}
