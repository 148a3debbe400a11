use std::collections::HashMap;
use std::env;

use crate::error::ResolverError;
use crate::traits::KeyResolver;

const ENV_PREFIX: &str = "env:";

/// Resolves credentials from environment variables
pub struct EnvResolver;

impl EnvResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a source naming exactly two variables into `(key, secret)`,
    /// in the order they are listed.
    pub fn resolve_pair(&self, source: &str) -> Result<(String, String), ResolverError> {
        let names = variable_names(source)?;
        let [key_var, secret_var] = names.as_slice() else {
            return Err(ResolverError::UnsupportedSource(format!(
                "expected two variables, got {}",
                names.len()
            )));
        };
        let mut values = self.resolve(source)?;
        let key = values
            .remove(*key_var)
            .ok_or_else(|| ResolverError::MissingKey(key_var.to_string()))?;
        let secret = values
            .remove(*secret_var)
            .ok_or_else(|| ResolverError::MissingKey(secret_var.to_string()))?;
        Ok((key, secret))
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn variable_names(source: &str) -> Result<Vec<&str>, ResolverError> {
    let vars = source.strip_prefix(ENV_PREFIX).ok_or_else(|| {
        ResolverError::UnsupportedSource(format!("expected 'env:' prefix, got: {}", source))
    })?;

    let names: Vec<&str> = vars
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if names.is_empty() {
        return Err(ResolverError::UnsupportedSource("empty env source".to_string()));
    }
    Ok(names)
}

impl KeyResolver for EnvResolver {
    /// Parses "env:VAR1,VAR2" and returns values from environment.
    /// A variable that is unset or empty counts as missing.
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError> {
        let mut result = HashMap::new();
        for var in variable_names(source)? {
            match env::var(var) {
                Ok(value) if !value.is_empty() => {
                    result.insert(var.to_string(), value);
                }
                _ => return Err(ResolverError::MissingKey(var.to_string())),
            }
        }
        Ok(result)
    }
}
