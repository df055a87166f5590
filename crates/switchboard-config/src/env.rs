use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Placeholder expansion failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error("environment variable not found: `{0}`")]
    MissingVariable(String),
    #[error("only variables scoped with 'env.' are supported: `{0}`")]
    UnsupportedScope(String),
}

/// Expand `{{ env.VAR }}` placeholders in raw configuration text
///
/// Works on both the TOML gateway config and the YAML credential files,
/// since both use `#` for comments. `{{ env.VAR | default("fallback") }}`
/// substitutes the fallback when the variable is unset. Comment lines are
/// passed through unchanged.
pub fn expand_env(input: &str) -> Result<String, ExpandError> {
    fn re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        // Group 1: scoped key, group 2: optional default
        RE.get_or_init(|| {
            Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
                .expect("must be valid regex")
        })
    }

    let mut output = String::with_capacity(input.len());

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut last_end = 0;

        for captures in re().captures_iter(line) {
            let (Some(overall), Some(key)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let key = key.as_str();

            output.push_str(&line[last_end..overall.start()]);

            let mut parts = key.split('.');
            let (Some("env"), Some(var_name), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(ExpandError::UnsupportedScope(key.to_owned()));
            };

            match (std::env::var(var_name), captures.get(2)) {
                (Ok(value), _) => output.push_str(&value),
                (Err(_), Some(default)) => output.push_str(default.as_str()),
                (Err(_), None) => return Err(ExpandError::MissingVariable(var_name.to_owned())),
            }

            last_end = overall.end();
        }

        output.push_str(&line[last_end..]);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_placeholders() {
        let input = "api_key: \"abc\"";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn single_env_var() {
        temp_env::with_var("SB_TEST_REGION", Some("us-east-1"), || {
            let result = expand_env("region: {{ env.SB_TEST_REGION }}").unwrap();
            assert_eq!(result, "region: us-east-1");
        });
    }

    #[test]
    fn multiple_env_vars_across_lines() {
        let vars = [("SB_FOO", Some("foo")), ("SB_BAR", Some("bar"))];
        temp_env::with_vars(vars, || {
            let result = expand_env("a: \"{{ env.SB_FOO }}\"\nb: \"{{env.SB_BAR}}\"\n").unwrap();
            assert_eq!(result, "a: \"foo\"\nb: \"bar\"\n");
        });
    }

    #[test]
    fn missing_env_var() {
        temp_env::with_var_unset("SB_MISSING_VAR", || {
            let err = expand_env("key: \"{{ env.SB_MISSING_VAR }}\"").unwrap_err();
            assert_eq!(err, ExpandError::MissingVariable("SB_MISSING_VAR".into()));
        });
    }

    #[test]
    fn unsupported_scope() {
        let err = expand_env("key: \"{{ foo.BAR }}\"").unwrap_err();
        assert!(err.to_string().contains("only variables scoped with 'env.'"));
    }

    #[test]
    fn commented_lines_skip_expansion() {
        temp_env::with_var_unset("SB_MISSING_VAR", || {
            let input = "  # proxy: \"{{ env.SB_MISSING_VAR }}\"";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }

    #[test]
    fn default_used_when_var_missing() {
        temp_env::with_var_unset("SB_OPTIONAL_VAR", || {
            let result = expand_env("proxy: \"{{ env.SB_OPTIONAL_VAR | default(\"\") }}\"").unwrap();
            assert_eq!(result, "proxy: \"\"");
        });
    }

    #[test]
    fn default_not_used_when_var_present() {
        temp_env::with_var("SB_OPTIONAL_VAR", Some("actual"), || {
            let result = expand_env("key: \"{{ env.SB_OPTIONAL_VAR | default(\"fallback\") }}\"").unwrap();
            assert_eq!(result, "key: \"actual\"");
        });
    }
}
