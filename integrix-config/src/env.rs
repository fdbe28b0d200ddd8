// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;

/// Environment variable loader
///
/// With a prefix of `INTEGRIX`, `INTEGRIX_FAILURE_THRESHOLD=3` is exposed as
/// the key `failure_threshold`. Variables without the prefix are ignored.
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load all matching environment variables
    pub fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.filter(env::vars()))
    }

    fn filter(&self, vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for (key, value) in vars {
            match self.prefix {
                Some(ref prefix) => {
                    if let Some(rest) = key
                        .strip_prefix(prefix.as_str())
                        .and_then(|rest| rest.strip_prefix('_'))
                    {
                        config.insert(rest.to_lowercase(), value);
                    }
                }
                None => {
                    config.insert(key.to_lowercase(), value);
                }
            }
        }

        config
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // std::env::set_var is unsafe under edition 2024, so prefix handling is
    // exercised through `filter` with synthetic variables.

    fn vars(pairs: &[(&str, &str)]) -> impl Iterator<Item = (String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_prefix_filtering() {
        let loader = EnvLoader::new(Some("INTEGRIX".to_string()));
        let loaded = loader.filter(vars(&[
            ("INTEGRIX_FAILURE_THRESHOLD", "3"),
            ("INTEGRIXOTHER", "ignored"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("failure_threshold").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_no_prefix_keeps_everything() {
        let loader = EnvLoader::default();
        let loaded = loader.filter(vars(&[("HOME", "/root"), ("Term", "xterm")]));

        assert_eq!(loaded.get("home").map(String::as_str), Some("/root"));
        assert_eq!(loaded.get("term").map(String::as_str), Some("xterm"));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("INTEGRIX_TEST".to_string()));
        let result = loader.load_var("MISSING_VAR_67890");

        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    }
}
