use crate::errors::StoreError;

/// Store business codes that mean the bearer token is invalid or expired.
pub const AUTH_FAILURE_CODES: [i64; 4] = [99_991_661, 99_991_663, 99_991_668, 99_991_677];

const AUTH_FAILURE_PHRASES: [&str; 4] = [
    "invalid access token",
    "token expired",
    "access_token is expired",
    "unauthorized",
];

/// Returns true if a store error means the credential must be refreshed.
///
/// Structured signals (HTTP 401, known business codes) are checked first;
/// message substrings are the fallback for responses without them.
#[must_use]
pub fn is_auth_failure(error: &StoreError) -> bool {
    match error {
        StoreError::Status { status: 401, .. } => return true,
        StoreError::Api { code, .. } if AUTH_FAILURE_CODES.contains(code) => return true,
        StoreError::Api { .. } | StoreError::Status { .. } => {}
        // A transport failure never reached the auth layer.
        StoreError::Transport(_) => return false,
        StoreError::Malformed(_) => {}
    }
    let message = error.message().to_lowercase();
    AUTH_FAILURE_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_codes() {
        assert!(is_auth_failure(&StoreError::status(401, "")));
        assert!(is_auth_failure(&StoreError::api(99_991_663, "whatever")));
        assert!(is_auth_failure(&StoreError::api(99_991_677, "")));
        assert!(!is_auth_failure(&StoreError::status(500, "server error")));
        assert!(!is_auth_failure(&StoreError::api(1_254_045, "field type mismatch")));
    }

    #[test]
    fn test_message_heuristic() {
        assert!(is_auth_failure(&StoreError::api(1, "Invalid access token for authorization")));
        assert!(is_auth_failure(&StoreError::status(400, "token expired")));
        assert!(is_auth_failure(&StoreError::Malformed("access_token is expired".into())));
    }

    #[test]
    fn test_transport_is_not_auth() {
        assert!(!is_auth_failure(&StoreError::Transport("token expired?".into())));
    }
}
