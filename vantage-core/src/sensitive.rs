//! Shared sensitive-token vocabulary for scanning URLs (§4.6.1). Used both
//! by C7 when assembling a [`crate::Flow`] (to set `sensitive_data`) and by
//! the HTTP analyzer (to emit the `sensitive_data_exposure` finding), so the
//! flag and the finding never disagree about what counts as sensitive.

/// `(substring, semantic class)` pairs, checked against a lower-cased URL.
pub const SENSITIVE_TOKENS: &[(&str, &str)] = &[
    ("password", "password parameter"),
    ("passwd", "password parameter"),
    ("pwd", "password parameter"),
    ("apikey", "API key"),
    ("api_key", "API key"),
    ("api-key", "API key"),
    ("token", "token"),
    ("secret", "secret"),
    ("private_key", "private key"),
    ("access_token", "access token"),
    ("refresh_token", "refresh token"),
    ("session_id", "session identifier"),
    ("ssn", "social security number"),
    ("credit_card", "credit card number"),
    ("ccnumber", "credit card number"),
];

/// First matching token in `url` (already lower-cased once by the caller,
/// per §4.6.1), if any.
pub fn scan_url(url_lowercased: &str) -> Option<(&'static str, &'static str)> {
    SENSITIVE_TOKENS
        .iter()
        .find(|(token, _)| url_lowercased.contains(token))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_password_in_query_string() {
        let url = "http://api.example/login?password=hunter2".to_lowercase();
        assert_eq!(scan_url(&url), Some(("password", "password parameter")));
    }

    #[test]
    fn clean_url_has_no_match() {
        let url = "https://example.com/".to_lowercase();
        assert!(scan_url(&url).is_none());
    }
}
