//! services/portal/src/validation.rs
//!
//! Input validators for the fields the portal collects, and the sanitizer applied
//! to any text that ends up in front of the user.

use regex::Regex;
use std::sync::LazyLock;

const MAX_EMAIL_LEN: usize = 100;
const MAX_TEXT_LEN: usize = 1000;
const MAX_CURRENCY: f64 = 1_000_000.0;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));
static SCRIPT_SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("scheme pattern is valid"));
static INLINE_HANDLER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)on\w+=").expect("handler pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::new("email", "is too long"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationError::new("email", "is not a valid address"));
    }
    Ok(())
}

/// Checks a Brazilian CPF, with or without punctuation.
pub fn validate_cpf(cpf: &str) -> Result<(), ValidationError> {
    let digits: Vec<u32> = cpf.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return Err(ValidationError::new("cpf", "must have 11 digits"));
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return Err(ValidationError::new("cpf", "is a repeated-digit sequence"));
    }

    let check_digit = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .zip((2..=len as u32 + 1).rev())
            .map(|(d, weight)| d * weight)
            .sum();
        match 11 - (sum % 11) {
            d if d > 9 => 0,
            d => d,
        }
    };

    if check_digit(9) != digits[9] || check_digit(10) != digits[10] {
        return Err(ValidationError::new("cpf", "has invalid check digits"));
    }
    Ok(())
}

/// Accepts landline (10) and mobile (11) numbers in any punctuation.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let count = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if !(10..=11).contains(&count) {
        return Err(ValidationError::new("phone", "must have 10 or 11 digits"));
    }
    Ok(())
}

pub fn validate_currency(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=MAX_CURRENCY).contains(&value) {
        return Err(ValidationError::new("currency", "must be between 0 and 1000000"));
    }
    Ok(())
}

/// Strips markup and script vectors from free text and caps its length.
///
/// Stripping repeats until nothing matches, so removed fragments cannot
/// reassemble a pattern (`javajavascript:script:`).
pub fn sanitize_text(text: &str) -> String {
    let mut cleaned: String = text.chars().filter(|c| *c != '<' && *c != '>').collect();
    loop {
        let without_scheme = SCRIPT_SCHEME_RE.replace_all(&cleaned, "");
        let next = INLINE_HANDLER_RE.replace_all(&without_scheme, "").into_owned();
        if next.len() == cleaned.len() {
            break;
        }
        cleaned = next;
    }
    cleaned.trim().chars().take(MAX_TEXT_LEN).collect()
}
