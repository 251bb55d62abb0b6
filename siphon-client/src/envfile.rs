//! Env-file emission, per SPEC_FULL.md §4.5 and §6: keys sorted lexically,
//! `KEY=VALUE\n` per line, UTF-8, no quoting; the JSON variant is
//! pretty-printed with two-space indentation.

use std::collections::BTreeMap;

/// Renders `environment` as a `KEY=VALUE` env file. A `BTreeMap` already
/// iterates in key order, so no explicit sort is needed here -- the
/// ordering guarantee lives in the type, not in this function.
pub fn render_dotenv(environment: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in environment {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Renders `environment` as pretty-printed JSON (two-space indent), per
/// the "JSON variant" in §4.5.
pub fn render_json(environment: &BTreeMap<String, String>) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(environment, &mut serializer)?;
    Ok(String::from_utf8(buf).expect("serde_json only emits valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn dotenv_is_sorted_and_unquoted() {
        let rendered = render_dotenv(&env(&[("ZEBRA", "1"), ("ALPHA", "2")]));
        assert_eq!(rendered, "ALPHA=2\nZEBRA=1\n");
    }

    #[test]
    fn dotenv_of_empty_map_is_empty_string() {
        assert_eq!(render_dotenv(&BTreeMap::new()), "");
    }

    #[test]
    fn json_is_pretty_printed_with_two_space_indent() {
        let rendered = render_json(&env(&[("KEY", "value")])).unwrap();
        assert_eq!(rendered, "{\n  \"KEY\": \"value\"\n}");
    }
}
