//! Template variables passed on the command line.

use std::collections::HashMap;

use crate::error::{ConfigError, Result};

const DELIMITER: char = ',';

/// Parse a `k1,v1,k2,v2` list into a variable map.
///
/// An empty string yields an empty map. Later duplicates win.
///
/// # Errors
///
/// Returns `ConfigError::OddVars` if the number of items is odd.
pub fn parse_vars(raw: &str) -> Result<HashMap<String, String>> {
    if raw.is_empty() {
        return Ok(HashMap::new());
    }

    let items: Vec<&str> = raw.split(DELIMITER).collect();
    if items.len() % 2 != 0 {
        return Err(ConfigError::OddVars);
    }

    Ok(items
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_empty_map() {
        assert!(parse_vars("").unwrap().is_empty());
    }

    #[test]
    fn pairs_become_entries() {
        let vars = parse_vars("region,eu-west-1,bucket,logs").unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["region"], "eu-west-1");
        assert_eq!(vars["bucket"], "logs");
    }

    #[test]
    fn odd_count_rejected() {
        let err = parse_vars("region,eu-west-1,bucket").unwrap_err();
        assert!(matches!(err, ConfigError::OddVars));
        assert_eq!(
            err.to_string(),
            "--vars must have an even number of keys and values"
        );
    }

    #[test]
    fn empty_values_are_kept() {
        let vars = parse_vars("a,,b,2").unwrap();
        assert_eq!(vars["a"], "");
        assert_eq!(vars["b"], "2");
    }
}
