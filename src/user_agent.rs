//! User-Agent strings for segment requests.
//!
//! Video CDNs commonly reject non-browser agents on segment URLs, so the
//! default identifies as a desktop browser. Override via `ClientOptions`.

/// Desktop browser User-Agent sent when no override is configured.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_user_agent_is_single_line() {
        assert!(BROWSER_USER_AGENT.starts_with("Mozilla/5.0"));
        assert!(!BROWSER_USER_AGENT.contains('\n'));
        assert!(!BROWSER_USER_AGENT.contains("  "));
    }
}
