//! Deployment-time rewrite rules

use crate::error::ProxyError;
use anyhow::{Context, Result};
use hyper::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Which backend statuses get the redirect treatment, and which element
/// attributes carry URLs worth rewriting.
///
/// One generic element handler consults the table; adding a tag/attribute
/// pair is a configuration change, not code.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewriteRules {
    /// Backend statuses answered with a rewritten redirect envelope.
    pub redirect_statuses: Vec<u16>,

    /// Element tag -> attribute holding its navigation/resource URL.
    pub rewrite_table: BTreeMap<String, String>,
}

impl Default for RewriteRules {
    fn default() -> Self {
        Self {
            redirect_statuses: vec![301, 302, 303, 307, 308],
            rewrite_table: [
                ("a", "href"),
                ("img", "src"),
                ("link", "href"),
                ("script", "src"),
                ("form", "action"),
            ]
            .into_iter()
            .map(|(tag, attr)| (tag.to_string(), attr.to_string()))
            .collect(),
        }
    }
}

impl RewriteRules {
    /// Load rules from a JSON file; fields left out keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading rules file {}", path.as_ref().display()))?;
        let rules: Self = serde_json::from_str(&raw).context("parsing rules file")?;
        rules.validate().context("validating rules file")?;
        Ok(rules)
    }

    pub fn is_redirect(&self, status: StatusCode) -> bool {
        self.redirect_statuses.contains(&status.as_u16())
    }

    /// Check every table entry parses as a tag selector, so per-request
    /// rewriter construction cannot fail later.
    pub fn validate(&self) -> Result<(), ProxyError> {
        for tag in self.rewrite_table.keys() {
            tag.parse::<lol_html::Selector>()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let rules = RewriteRules::default();
        assert!(rules.is_redirect(StatusCode::FOUND));
        assert!(rules.is_redirect(StatusCode::SEE_OTHER));
        assert!(!rules.is_redirect(StatusCode::OK));
        assert!(!rules.is_redirect(StatusCode::NOT_MODIFIED));
        assert_eq!(rules.rewrite_table.get("a").unwrap(), "href");
        assert_eq!(rules.rewrite_table.get("form").unwrap(), "action");
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_and_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"redirect_statuses": [301, 302]}}"#).unwrap();

        let rules = RewriteRules::from_file(file.path()).unwrap();
        assert!(rules.is_redirect(StatusCode::MOVED_PERMANENTLY));
        assert!(!rules.is_redirect(StatusCode::SEE_OTHER));
        // table left out of the file keeps the default
        assert_eq!(rules.rewrite_table.get("img").unwrap(), "src");
    }

    #[test]
    fn test_from_file_rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"redirect_status": [301]}}"#).unwrap();
        assert!(RewriteRules::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_tag() {
        let mut rules = RewriteRules::default();
        rules
            .rewrite_table
            .insert("not a tag".to_string(), "href".to_string());
        assert!(rules.validate().is_err());
    }
}
