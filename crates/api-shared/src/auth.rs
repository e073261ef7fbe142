/// Header carrying the API key on every `/api/v1` request.
pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing API key")]
    Missing,
    #[error("Invalid API key")]
    Invalid,
}

/// Validates the provided API key against the key configured at startup.
///
/// Returns `Ok(())` if the key is valid, or an error if invalid or missing. An empty header
/// value is treated as missing.
pub fn validate_api_key(provided_key: Option<&str>, expected_key: &str) -> Result<(), AuthError> {
    let provided_key = provided_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(AuthError::Missing)?;

    if provided_key == expected_key {
        Ok(())
    } else {
        Err(AuthError::Invalid)
    }
}
