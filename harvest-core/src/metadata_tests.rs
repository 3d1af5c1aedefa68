/*!
Edge-case tests for metadata normalization.
*/

#[cfg(test)]
mod tests {
    use crate::metadata::{normalize, stringify, Metadata};
    use serde_json::{json, Value};

    fn metadata(value: Value) -> Metadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_normalize_is_idempotent_on_strings() {
        let input = metadata(json!({"source": "crawler", "page": "3"}));
        let once = normalize(Some(&input));

        let as_values: Metadata = once
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let twice = normalize(Some(&as_values));

        assert_eq!(once, twice);
        assert_eq!(once.get("source").map(String::as_str), Some("crawler"));
        assert_eq!(once.get("page").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_normalize_mixed_values() {
        let input = metadata(json!({
            "n": 5,
            "flag": true,
            "off": false,
            "ratio": 0.25,
            "missing": null,
            "tags": ["a", "b"],
        }));
        let normalized = normalize(Some(&input));

        let expected: Vec<(&str, &str)> = vec![
            ("flag", "True"),
            ("missing", "None"),
            ("n", "5"),
            ("off", "False"),
            ("ratio", "0.25"),
            ("tags", r#"["a","b"]"#),
        ];
        let actual: Vec<(&str, &str)> = normalized
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_normalize_keeps_empty_strings() {
        let input = metadata(json!({"note": ""}));
        assert_eq!(
            normalize(Some(&input)).get("note").map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn test_stringify_negative_and_large_numbers() {
        assert_eq!(stringify(&json!(-12)), "-12");
        assert_eq!(stringify(&json!(18446744073709551615u64)), "18446744073709551615");
    }

    #[test]
    fn test_normalize_does_not_touch_input() {
        let input = metadata(json!({"n": 1}));
        let _ = normalize(Some(&input));
        assert_eq!(input.get("n"), Some(&json!(1)));
    }
}
