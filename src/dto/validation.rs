//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_IDENTIFIER_LEN: usize = 64;
const MAX_OPTION_KEY_LEN: usize = 16;

/// Validates an identifier issued by an external system (conference, question, participant).
///
/// # Examples
///
/// ```ignore
/// validate_identifier("conf-42")   // Ok
/// validate_identifier("")          // Err - empty
/// validate_identifier("a b")       // Err - whitespace
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some(
            format!(
                "Identifier must be 1 to {MAX_IDENTIFIER_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        let mut err = ValidationError::new("identifier_format");
        err.message =
            Some("Identifier may only contain ASCII letters, digits, '-', '_' and '.'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a short option key such as `A` or `opt_2`.
pub fn validate_option_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() || key.len() > MAX_OPTION_KEY_LEN {
        let mut err = ValidationError::new("option_key_length");
        err.message = Some(
            format!("Option key must be 1 to {MAX_OPTION_KEY_LEN} characters (got {})", key.len())
                .into(),
        );
        return Err(err);
    }

    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        let mut err = ValidationError::new("option_key_format");
        err.message = Some("Option key may only contain ASCII letters, digits and '_'".into());
        return Err(err);
    }

    Ok(())
}
