//! Canonical phone number normalization.
//!
//! Every phone number in the system is stored and compared in a single
//! canonical E.164 form, which also serves as the uniqueness key for members.
//!
//! Accepted input grammar:
//!
//! - an optional leading `+`
//! - digits interleaved with spaces, dots, dashes and parentheses
//!
//! Interpretation of the digit run:
//!
//! - 10 digits → NANP number, canonicalized as `+1` + digits
//! - 11 digits starting with `1` → `+` + digits
//! - any other run of 8–15 digits with an explicit leading `+` → `+` + digits
//!   (E.164 length bounds)
//!
//! Anything else fails with [`PhoneError::InvalidFormat`].

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    InvalidFormat(String),
}

impl std::fmt::Display for PhoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhoneError::InvalidFormat(input) => {
                write!(f, "invalid phone number format: {input:?}")
            }
        }
    }
}

impl std::error::Error for PhoneError {}

/// Characters tolerated as punctuation between digits.
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '.' | '-' | '(' | ')')
}

/// Normalize a human-entered phone number to canonical E.164 form.
pub fn normalize(input: &str) -> Result<String, PhoneError> {
    let trimmed = input.trim();
    let (has_plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !is_separator(c) {
            return Err(PhoneError::InvalidFormat(input.to_string()));
        }
    }

    match digits.len() {
        10 => Ok(format!("+1{digits}")),
        11 if digits.starts_with('1') => Ok(format!("+{digits}")),
        8..=15 if has_plus => Ok(format!("+{digits}")),
        _ => Err(PhoneError::InvalidFormat(input.to_string())),
    }
}

/// Last four digits of a canonical number, used for default member names.
pub fn last_four(canonical: &str) -> &str {
    let start = canonical.len().saturating_sub(4);
    &canonical[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ten_digits_get_nanp_prefix() {
        assert_eq!(normalize("2065550100").unwrap(), "+12065550100");
    }

    #[test]
    fn punctuated_forms_normalize() {
        assert_eq!(normalize("+1 (206) 555-0100").unwrap(), "+12065550100");
        assert_eq!(normalize("206.555.0100").unwrap(), "+12065550100");
        assert_eq!(normalize("(206) 555 0100").unwrap(), "+12065550100");
    }

    #[test]
    fn eleven_digits_with_country_code() {
        assert_eq!(normalize("12065550100").unwrap(), "+12065550100");
        assert_eq!(normalize("+12065550100").unwrap(), "+12065550100");
    }

    #[test]
    fn international_requires_explicit_plus() {
        assert_eq!(normalize("+442071838750").unwrap(), "+442071838750");
        assert!(normalize("442071838750").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(normalize("").is_err());
        assert!(normalize("call me").is_err());
        assert!(normalize("555-0100").is_err());
        assert!(normalize("+1").is_err());
    }

    #[test]
    fn last_four_suffix() {
        assert_eq!(last_four("+12065550100"), "0100");
    }
}
