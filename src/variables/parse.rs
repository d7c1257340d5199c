//! `$(label:name)` substitution in plain text

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Matches `$(label:name)`
pub static VARIABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(([^:$)]+):([^)$]+)\)").expect("valid variable regex")
});

/// Text shown for variables that do not exist
pub const UNKNOWN_VALUE: &str = "$NA";

/// Text shown when a button's text refers back to itself
pub const RECURSION_GUARD_VALUE: &str = "$RE";

/// Result of substituting variables into a string
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedText {
    pub text: String,
    pub variable_ids: HashSet<String>,
}

/// Replace every `$(label:name)` with the text returned by `lookup`
///
/// `lookup` returns `None` for unknown variables, which render as `$NA`.
pub fn substitute(text: &str, lookup: &mut dyn FnMut(&str) -> Option<String>) -> ParsedText {
    let mut variable_ids = HashSet::new();
    let replaced = VARIABLE_REGEX.replace_all(text, |caps: &regex::Captures<'_>| {
        let id = format!("{}:{}", &caps[1], &caps[2]);
        let value = lookup(&id).unwrap_or_else(|| UNKNOWN_VALUE.to_string());
        variable_ids.insert(id);
        value
    });
    ParsedText {
        text: replaced.into_owned(),
        variable_ids,
    }
}

/// Variable ids referenced by a string, without resolving them
pub fn variable_ids_in(text: &str) -> Vec<String> {
    VARIABLE_REGEX
        .captures_iter(text)
        .map(|caps| format!("{}:{}", &caps[1], &caps[2]))
        .collect()
}

/// Rewrite the label of every `$(old:...)` reference to `new`
pub fn replace_label(text: &str, old: &str, new: &str) -> String {
    VARIABLE_REGEX
        .replace_all(text, |caps: &regex::Captures<'_>| {
            if &caps[1] == old {
                format!("$({}:{})", new, &caps[2])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_known_and_unknown() {
        let parsed = substitute("Cam $(obs:scene) / $(obs:nope)", &mut |id| {
            (id == "obs:scene").then(|| "Wide".to_string())
        });
        assert_eq!(parsed.text, "Cam Wide / $NA");
        assert!(parsed.variable_ids.contains("obs:scene"));
        assert!(parsed.variable_ids.contains("obs:nope"));
    }

    #[test]
    fn test_replace_label() {
        assert_eq!(
            replace_label("$(old:a) $(other:b) $(old:c)", "old", "new"),
            "$(new:a) $(other:b) $(new:c)"
        );
    }

    #[test]
    fn test_variable_ids_in() {
        assert_eq!(
            variable_ids_in("x $(internal:time_hms) y"),
            vec!["internal:time_hms".to_string()]
        );
        assert!(variable_ids_in("plain text").is_empty());
    }
}
