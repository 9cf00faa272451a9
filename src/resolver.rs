//! Repository identifier resolution.
//!
//! Users hand us whatever is convenient: a full clone URL, a registry
//! alias, or an `owner/repo` shorthand. Strategies are tried in that fixed
//! order and the first match wins.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// URL prefixes recognized by the URL strategy.
const URL_PREFIXES: &[&str] = &["http://", "https://", "ssh://", "git://", "git@", "file://"];

/// A resolved (name, URL) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepo {
    pub name: String,
    pub url: String,
}

/// Resolves repo tokens against a registry of alias -> URL.
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    registry: BTreeMap<String, String>,
}

impl IdentifierResolver {
    pub fn new(registry: BTreeMap<String, String>) -> Self {
        Self { registry }
    }

    /// Resolve a token to a (name, URL) pair.
    ///
    /// Blank tokens resolve to `None` without error so callers can filter
    /// pattern-derived sets. An unmatched token is an error only when the
    /// user asked for it explicitly.
    pub fn resolve(&self, token: &str, user_requested: bool) -> Result<Option<ResolvedRepo>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }

        if let Some(resolved) = self.try_url(token) {
            return Ok(Some(resolved));
        }
        if let Some(resolved) = self.try_registry(token) {
            return Ok(Some(resolved));
        }
        if let Some(resolved) = try_shorthand(token) {
            return Ok(Some(resolved));
        }

        if user_requested {
            Err(Error::UnknownRepository(token.to_string()))
        } else {
            Ok(None)
        }
    }

    fn try_url(&self, token: &str) -> Option<ResolvedRepo> {
        if !URL_PREFIXES.iter().any(|prefix| token.starts_with(prefix)) {
            return None;
        }

        // A registered URL resolves to its alias.
        if let Some((alias, _)) = self.registry.iter().find(|(_, url)| url.as_str() == token) {
            return Some(ResolvedRepo {
                name: alias.clone(),
                url: token.to_string(),
            });
        }

        let name = repo_name_from_url(token)?;
        Some(ResolvedRepo {
            name,
            url: token.to_string(),
        })
    }

    fn try_registry(&self, token: &str) -> Option<ResolvedRepo> {
        self.registry.get(token).map(|url| ResolvedRepo {
            name: token.to_string(),
            url: url.clone(),
        })
    }
}

/// `owner/repo` with exactly one slash and non-empty halves.
fn try_shorthand(token: &str) -> Option<ResolvedRepo> {
    if token.chars().filter(|&c| c == '/').count() != 1 {
        return None;
    }
    let (owner, repo) = token.split_once('/')?;
    let owner = owner.trim();
    let repo = repo.trim();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(ResolvedRepo {
        name: repo.to_string(),
        url: format!("https://github.com/{owner}/{repo}"),
    })
}

/// Derive a repo name from a URL: last non-empty path segment with any
/// trailing `.git` stripped. scp-style `user@host:path` takes the part
/// after the last colon first.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let path = if !url.contains("://") && url.contains('@') && url.contains(':') {
        url.rsplit_once(':').map(|(_, rest)| rest)?
    } else {
        url
    };

    let segment = path
        .split('/')
        .rev()
        .map(str::trim)
        .find(|segment| !segment.is_empty())?;

    let name = segment.strip_suffix(".git").unwrap_or(segment);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentifierResolver {
        let mut registry = BTreeMap::new();
        registry.insert("api".to_string(), "git@github.com:acme/api-server.git".to_string());
        IdentifierResolver::new(registry)
    }

    #[test]
    fn blank_tokens_resolve_to_none() {
        let r = resolver();
        assert_eq!(r.resolve("", true).unwrap(), None);
        assert_eq!(r.resolve("   ", true).unwrap(), None);
    }

    #[test]
    fn url_strategy_derives_name() {
        let r = resolver();
        let resolved = r
            .resolve("https://github.com/acme/widgets.git", true)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.name, "widgets");
        assert_eq!(resolved.url, "https://github.com/acme/widgets.git");
    }

    #[test]
    fn url_strategy_prefers_registered_alias() {
        let r = resolver();
        let resolved = r
            .resolve("git@github.com:acme/api-server.git", true)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.name, "api");
    }

    #[test]
    fn scp_style_urls_parse() {
        let r = resolver();
        let resolved = r
            .resolve("git@example.com:team/deep/thing.git", true)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.name, "thing");
    }

    #[test]
    fn registry_strategy_matches_alias() {
        let r = resolver();
        let resolved = r.resolve("api", true).unwrap().unwrap();
        assert_eq!(resolved.name, "api");
        assert_eq!(resolved.url, "git@github.com:acme/api-server.git");
    }

    #[test]
    fn shorthand_expands_to_github() {
        let r = resolver();
        let resolved = r.resolve("acme/widgets", true).unwrap().unwrap();
        assert_eq!(resolved.name, "widgets");
        assert_eq!(resolved.url, "https://github.com/acme/widgets");
    }

    #[test]
    fn registry_wins_over_shorthand_order() {
        // A URL token never falls through to shorthand even when it
        // contains a single slash.
        let r = resolver();
        let resolved = r.resolve("file:///srv/repo.git", true).unwrap();
        assert!(resolved.is_some());
    }

    #[test]
    fn shorthand_rejects_malformed_tokens() {
        let r = resolver();
        assert!(r.resolve("a/b/c", true).is_err());
        assert!(r.resolve("/repo", true).is_err());
        assert!(r.resolve("owner/", true).is_err());
    }

    #[test]
    fn unknown_tokens_error_only_when_user_requested() {
        let r = resolver();
        assert_eq!(
            r.resolve("mystery", true).unwrap_err().code(),
            "unknown-repository"
        );
        assert_eq!(r.resolve("mystery", false).unwrap(), None);
    }

    #[test]
    fn name_from_url_edge_cases() {
        assert_eq!(repo_name_from_url("https://host/a/b/"), Some("b".into()));
        assert_eq!(repo_name_from_url("git@h:x.git"), Some("x".into()));
        assert_eq!(repo_name_from_url("https://host/"), Some("host".into()));
    }
}
