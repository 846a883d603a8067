//! Candidate-tab discovery and ranking.
//!
//! Open tabs on (or near) the backend origin are ranked as token sources:
//! exact origin beats same host beats same hostname, with bonuses for the
//! active tab and login-looking paths, recency breaking remaining ties.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An open browser tab as reported by the host environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub active: bool,
    /// Last access time (Unix ms)
    #[serde(default)]
    pub last_accessed: u64,
}

/// Host-environment surface for tab enumeration and storage reads.
#[async_trait]
pub trait TabProvider: Send + Sync {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>>;

    /// Read one storage key from a tab's page. `None` when absent.
    async fn read_storage(&self, tab_id: &str, key: &str) -> Result<Option<String>>;
}

/// Tab provider for hosts without tab access: resolution falls through to
/// the manually configured token.
pub struct NoTabAccess;

#[async_trait]
impl TabProvider for NoTabAccess {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        Ok(Vec::new())
    }

    async fn read_storage(&self, _tab_id: &str, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A ranked tab considered as a token source. Ephemeral; discarded after
/// resolution.
#[derive(Debug, Clone)]
pub struct CandidateTab {
    pub id: String,
    pub url: String,
    pub score: u32,
    pub last_accessed: u64,
}

const SCORE_EXACT_ORIGIN: u32 = 100;
const SCORE_SAME_HOST: u32 = 60;
const SCORE_SAME_HOSTNAME: u32 = 40;
const BONUS_ACTIVE_TAB: u32 = 15;
const BONUS_LOGIN_PATH: u32 = 10;

/// Parse `scheme://host[:port]` out of a URL. `None` for anything that is
/// not an absolute http(s) URL.
pub fn origin_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .map(|r| ("https", r))
        .or_else(|| url.strip_prefix("http://").map(|r| ("http", r)))?;
    let (scheme, rest) = rest;
    let authority = rest.split(['/', '?', '#']).next()?;
    if authority.is_empty() || authority.contains('@') || authority.contains(' ') {
        return None;
    }
    Some(format!("{}://{}", scheme, authority.to_lowercase()))
}

/// `host[:port]` of a URL, lowercased.
pub fn host_of(url: &str) -> Option<String> {
    origin_of(url).map(|origin| {
        origin
            .splitn(2, "://")
            .nth(1)
            .unwrap_or_default()
            .to_string()
    })
}

/// Hostname without port.
pub fn hostname_of(url: &str) -> Option<String> {
    host_of(url).map(|host| host.split(':').next().unwrap_or_default().to_string())
}

fn path_of(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[pos..],
        None => "",
    }
}

/// Rank tabs against a target origin, best first. Tabs on unrelated hosts
/// are dropped.
pub fn rank_candidate_tabs(target_origin: &str, tabs: &[TabInfo]) -> Vec<CandidateTab> {
    let target_host = host_of(target_origin);
    let target_hostname = hostname_of(target_origin);

    let mut candidates: Vec<CandidateTab> = tabs
        .iter()
        .filter_map(|tab| {
            let origin = origin_of(&tab.url)?;
            let mut score = if origin == target_origin {
                SCORE_EXACT_ORIGIN
            } else if host_of(&tab.url) == target_host {
                SCORE_SAME_HOST
            } else if hostname_of(&tab.url) == target_hostname {
                SCORE_SAME_HOSTNAME
            } else {
                return None;
            };

            if tab.active {
                score += BONUS_ACTIVE_TAB;
            }
            if path_of(&tab.url).to_lowercase().contains("login") {
                score += BONUS_LOGIN_PATH;
            }

            Some(CandidateTab {
                id: tab.id.clone(),
                url: tab.url.clone(),
                score,
                last_accessed: tab.last_accessed,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.last_accessed.cmp(&a.last_accessed))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: &str, url: &str, active: bool, last_accessed: u64) -> TabInfo {
        TabInfo {
            id: id.to_string(),
            url: url.to_string(),
            active,
            last_accessed,
        }
    }

    #[test]
    fn test_origin_parsing() {
        assert_eq!(
            origin_of("https://App.Example.com:8443/path?q=1"),
            Some("https://app.example.com:8443".to_string())
        );
        assert_eq!(
            origin_of("http://localhost:3000"),
            Some("http://localhost:3000".to_string())
        );
        assert_eq!(origin_of("ftp://example.com"), None);
        assert_eq!(origin_of("not a url"), None);
        assert_eq!(origin_of("https://"), None);
    }

    #[test]
    fn test_host_and_hostname() {
        assert_eq!(
            host_of("https://a.example.com:8443/x"),
            Some("a.example.com:8443".to_string())
        );
        assert_eq!(
            hostname_of("https://a.example.com:8443/x"),
            Some("a.example.com".to_string())
        );
    }

    #[test]
    fn test_exact_origin_beats_same_host() {
        let tabs = vec![
            tab("t1", "http://app.example.com/home", false, 50),
            tab("t2", "https://app.example.com/home", false, 10),
        ];
        let ranked = rank_candidate_tabs("https://app.example.com", &tabs);
        assert_eq!(ranked[0].id, "t2");
        assert_eq!(ranked[0].score, SCORE_EXACT_ORIGIN);
        assert_eq!(ranked[1].score, SCORE_SAME_HOST);
    }

    #[test]
    fn test_same_hostname_different_port_ranks_lowest() {
        let tabs = vec![
            tab("t1", "https://app.example.com:9000/x", false, 0),
            tab("t2", "https://other.example.com/x", false, 0),
        ];
        let ranked = rank_candidate_tabs("https://app.example.com", &tabs);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "t1");
        assert_eq!(ranked[0].score, SCORE_SAME_HOSTNAME);
    }

    #[test]
    fn test_active_and_login_bonuses_break_origin_ties() {
        let tabs = vec![
            tab("plain", "https://app.example.com/home", false, 99),
            tab("active", "https://app.example.com/home", true, 1),
            tab("login", "https://app.example.com/login", false, 1),
        ];
        let ranked = rank_candidate_tabs("https://app.example.com", &tabs);
        assert_eq!(ranked[0].id, "active");
        assert_eq!(ranked[1].id, "login");
        assert_eq!(ranked[2].id, "plain");
    }

    #[test]
    fn test_recency_breaks_remaining_ties() {
        let tabs = vec![
            tab("old", "https://app.example.com/a", false, 100),
            tab("new", "https://app.example.com/b", false, 200),
        ];
        let ranked = rank_candidate_tabs("https://app.example.com", &tabs);
        assert_eq!(ranked[0].id, "new");
    }
}
