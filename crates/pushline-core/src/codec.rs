//! Incremental field codec
//!
//! Update lines carry partial field state: a token either replaces, clears,
//! nulls, or leaves unchanged the previously decoded value of its field. The
//! whole rule lives in one pure function so it can be tested without any
//! stream machinery around it.

/// Decode a single field token against the field's previous decoded value.
///
/// `None` models a null/absent value (distinct from the empty string).
///
/// | token | result |
/// |---|---|
/// | `"$"` | empty string |
/// | `"#"` | null |
/// | `""` | previous value, unchanged |
/// | `#...` / `$...` | remainder after the marker, literal |
/// | anything else | the token, literal |
pub fn decode_field(token: &str, prev: Option<&str>) -> Option<String> {
    match token {
        "$" => Some(String::new()),
        "#" => None,
        "" => prev.map(str::to_string),
        _ => {
            if let Some(rest) = token.strip_prefix(['#', '$']) {
                Some(rest.to_string())
            } else {
                Some(token.to_string())
            }
        }
    }
}
