//! Sandboxed expression evaluation for `eval`, `eval3` and `ifeval`.
//!
//! Expressions are evaluated with `evalexpr`: no file system, no process
//! access, no user functions. The document vocabulary is the familiar
//! `and`/`or`/`not`, `True`/`False`/`None` spelling with single or double
//! quoted strings, which is translated to `evalexpr` syntax first.
//!
//! Arithmetic follows `evalexpr`, so integer division truncates:
//! `{eval:7/2}` is `3`. Write `{eval:7.0/2}` for `3.5`.

pub use evalexpr::Value;

/// Evaluate `expr`.
pub fn evaluate(expr: &str) -> Result<Value, evalexpr::EvalexprError> {
    evalexpr::eval(&translate(expr))
}

/// Truth value of a result: false, zero, empty strings and tuples and `None`
/// are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Tuple(t) => !t.is_empty(),
        Value::Empty => false,
    }
}

/// Text of an `eval` result: `True` is empty text, `False` and `None` are
/// `None` (suppress).
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Boolean(true) => Some(String::new()),
        Value::Boolean(false) | Value::Empty => None,
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(format!("{:.1}", f)),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Rewrite keywords and quoting outside string literals.
fn translate(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut word = String::new();
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        flush_word(&mut word, &mut out);
        match c {
            '"' | '\'' => {
                out.push('"');
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => {
                            out.push('\\');
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        _ if s == c => break,
                        '"' => out.push_str("\\\""),
                        _ => out.push(s),
                    }
                }
                out.push('"');
            }
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push('^');
            }
            _ => out.push(c),
        }
    }
    flush_word(&mut word, &mut out);
    out
}

fn flush_word(word: &mut String, out: &mut String) {
    match word.as_str() {
        "" => return,
        "and" => out.push_str("&&"),
        "or" => out.push_str("||"),
        "not" => out.push('!'),
        "True" => out.push_str("true"),
        "False" => out.push_str("false"),
        "None" => out.push_str("()"),
        w => out.push_str(w),
    }
    word.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1+2", Some("3"))]
    #[case("4.0/2", Some("2.0"))]
    #[case("7/2", Some("3"))]
    #[case("7.0/2", Some("3.5"))]
    #[case("'abc'", Some("abc"))]
    #[case("\"a\" + 'b'", Some("ab"))]
    #[case("1 == 1", Some(""))]
    #[case("True and False", None)]
    #[case("not False", Some(""))]
    #[case("None", None)]
    fn test_eval_results(#[case] expr: &str, #[case] expected: Option<&str>) {
        let value = evaluate(expr).unwrap();
        assert_eq!(to_text(&value).as_deref(), expected);
    }

    #[test]
    fn test_keywords_inside_strings_are_kept() {
        assert_eq!(translate("'x and y' or True"), "\"x and y\" || true");
        assert_eq!(translate("2**3"), "2^3");
        assert_eq!(translate("'say \"hi\"'"), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&evaluate("3 > 2").unwrap()));
        assert!(!is_truthy(&evaluate("0").unwrap()));
        assert!(!is_truthy(&evaluate("''").unwrap()));
        assert!(is_truthy(&evaluate("'x'").unwrap()));
    }

    #[test]
    fn test_syntax_error() {
        assert!(evaluate("1 +").is_err());
    }
}
