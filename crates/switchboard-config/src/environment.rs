use std::fmt;

/// Variable consulted once at startup for the deployment environment
pub const ENVIRONMENT_VAR: &str = "SWITCHBOARD_ENV";

/// Deployment environment used to pick a credential list
///
/// `debug` and `release` are accepted as aliases for `development` and
/// `production`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Environment(String);

impl Environment {
    pub const DEVELOPMENT: &str = "development";
    pub const PRODUCTION: &str = "production";
    pub const TEST: &str = "test";

    /// Read [`ENVIRONMENT_VAR`], defaulting to `development`
    pub fn from_env() -> Self {
        std::env::var(ENVIRONMENT_VAR).map_or_else(|_| Self::default(), |raw| Self::parse(&raw))
    }

    /// Normalize an environment name, resolving aliases
    pub fn parse(raw: &str) -> Self {
        let name = match raw.trim() {
            "" | "debug" => Self::DEVELOPMENT,
            "release" => Self::PRODUCTION,
            other => other,
        };

        Self(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self(Self::DEVELOPMENT.to_owned())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Environment {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}
