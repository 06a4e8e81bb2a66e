//! Freshness check outcome.

use super::FreshnessToken;

/// Relationship between the locally stored token and the server's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessCheck {
    pub is_stale: bool,
    /// `None` when the check failed or the server reported no token.
    pub server_version: Option<FreshnessToken>,
    pub local_version: Option<FreshnessToken>,
}

impl FreshnessCheck {
    /// Classify a pair of tokens.
    ///
    /// No local token is a first run, not a staleness event. Otherwise any
    /// difference is stale.
    pub fn classify(
        local_version: Option<FreshnessToken>,
        server_version: Option<FreshnessToken>,
    ) -> Self {
        let is_stale = match (&local_version, &server_version) {
            (Some(local), Some(server)) => local != server,
            _ => false,
        };
        Self {
            is_stale,
            server_version,
            local_version,
        }
    }

    /// Fail-open result used when the server could not be asked.
    pub(crate) fn assume_fresh(local_version: Option<FreshnessToken>) -> Self {
        Self {
            is_stale: false,
            server_version: None,
            local_version,
        }
    }

    /// First run: a server token exists but nothing is stored yet.
    pub fn is_first_seen(&self) -> bool {
        self.local_version.is_none() && self.server_version.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Option<FreshnessToken> {
        Some(FreshnessToken::from(s))
    }

    #[test]
    fn stale_iff_tokens_differ() {
        let pairs = [("a", "a", false), ("a", "b", true), ("2024-06-01", "2024-05-01", true)];
        for (local, server, expected) in pairs {
            let check = FreshnessCheck::classify(tok(local), tok(server));
            assert_eq!(check.is_stale, expected, "{local} vs {server}");
        }
    }

    #[test]
    fn no_local_version_is_first_seen_not_stale() {
        let check = FreshnessCheck::classify(None, tok("2024-05-01"));
        assert!(!check.is_stale);
        assert!(check.is_first_seen());
    }

    #[test]
    fn no_server_version_is_not_stale() {
        let check = FreshnessCheck::classify(tok("v1"), None);
        assert!(!check.is_stale);
        assert!(!check.is_first_seen());
    }
}
