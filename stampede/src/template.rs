//! `${NAME}` / `${NAME:-default}` placeholder expansion.

/// Expand every placeholder in `input`.
///
/// Names `lookup` cannot resolve fall back to the inline default, then are kept verbatim when
/// `keep` accepts them (values captured later at run time), otherwise rejected.
pub(crate) fn expand(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
    keep: impl Fn(&str) -> bool,
) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in `{input}`"))?;
        let inner = &after[..end];

        let (name, default) = match inner.split_once(":-") {
            Some((n, d)) => (n.trim(), Some(d)),
            None => (inner.trim(), None),
        };
        if name.is_empty() {
            return Err(format!("empty placeholder in `{input}`"));
        }

        match lookup(name).or_else(|| default.map(str::to_string)) {
            Some(v) => out.push_str(&v),
            None if keep(name) => {
                out.push_str("${");
                out.push_str(inner);
                out.push('}');
            }
            None => return Err(format!("unknown variable `{name}`")),
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Expand placeholders inside every string value of a JSON document.
///
/// Substitution happens on decoded strings, so quotes or backslashes in a value are escaped
/// when the document is serialized. Object keys are left as written.
pub(crate) fn expand_json<E>(
    doc: &mut serde_json::Value,
    expand_str: &impl Fn(&str) -> Result<String, E>,
) -> Result<(), E> {
    match doc {
        serde_json::Value::String(s) if s.contains("${") => {
            *s = expand_str(s)?;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_json(item, expand_str)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                expand_json(item, expand_str)?;
            }
        }
        _ => {}
    }
    Ok(())
}
