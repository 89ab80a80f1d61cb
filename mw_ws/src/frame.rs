//! Payload scrubbing for incoming push frames.
//!
//! The server occasionally prefixes payloads with a BOM or stray control
//! bytes. The websocket layer already reassembles fragmented messages, so
//! this module only has to clean a complete text payload and cut out the
//! first well-formed JSON object.

/// Strip the BOM and raw control characters (keeping whitespace the JSON
/// parser accepts).
pub fn scrub(payload: &str) -> String {
    payload.chars().filter(|c| *c != '\u{feff}' && (!c.is_control() || matches!(c, '\n' | '\r' | '\t'))).collect()
}

/// Extract the first complete JSON object, tolerating leading noise
/// bytes. Brace matching skips over string literals and escapes.
pub fn extract_json_object(payload: &str) -> Option<&str> {
    let start = payload.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in payload[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&payload[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_bom_and_controls() {
        let dirty = "\u{feff}\u{0000}{\"new\":[]}\u{0007}";
        assert_eq!(scrub(dirty), "{\"new\":[]}");
    }

    #[test]
    fn test_scrub_keeps_whitespace() {
        assert_eq!(scrub("{\n\t\"new\": []\r\n}"), "{\n\t\"new\": []\r\n}");
    }

    #[test]
    fn test_extract_plain_object() {
        assert_eq!(extract_json_object(r#"{"new":["a"]}"#), Some(r#"{"new":["a"]}"#));
    }

    #[test]
    fn test_extract_with_leading_noise() {
        let payload = r#"xx42{"new":["a","b"]}trailing"#;
        assert_eq!(extract_json_object(payload), Some(r#"{"new":["a","b"]}"#));
    }

    #[test]
    fn test_extract_nested_and_strings() {
        let payload = r#"noise{"a":{"b":"}{"},"new":["x"]}more"#;
        assert_eq!(extract_json_object(payload), Some(r#"{"a":{"b":"}{"},"new":["x"]}"#));
    }

    #[test]
    fn test_extract_incomplete() {
        assert_eq!(extract_json_object(r#"{"new":["a""#), None);
        assert_eq!(extract_json_object("no object here"), None);
    }

    #[test]
    fn test_extract_escaped_quote() {
        let payload = r#"{"a":"he said \"}\"","new":[]}"#;
        assert_eq!(extract_json_object(payload), Some(payload));
    }
}
