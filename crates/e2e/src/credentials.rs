//! Parsing of the login files the app image writes into its data directory

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::error::{E2eError, E2eResult};

/// One `Key: value` line; `#` comments never match
static LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^:#][^:]*?)\s*:\s*(.*?)\s*$").unwrap());

/// `Key: value` pairs from a login file, keys lower-cased
#[derive(Debug, Clone, Default)]
pub struct LoginFile {
    entries: HashMap<String, String>,
}

impl LoginFile {
    /// Lines without a colon and `#` comments are ignored. Values keep any
    /// further colons.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|l| LINE.captures(l))
            .map(|c| (c[1].to_lowercase(), c[2].to_string()))
            .collect();
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Value for `key`, an error if the key is absent or empty
    pub fn require(&self, key: &str) -> E2eResult<&str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(E2eError::CredentialKeyMissing(key.to_string())),
        }
    }

    pub fn password(&self) -> E2eResult<&str> {
        self.require("password")
    }
}
