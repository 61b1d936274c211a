use serde::{Deserialize, Serialize};

/// Default country prefix applied to bare 10-digit phone numbers.
pub const DEFAULT_COUNTRY_PREFIX: &str = "+52";

/// Partial, possibly noisy contact data arriving with an inbound event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHints {
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
}

impl IdentityHints {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.name.is_none()
    }
}

/// Which stage of the cascade produced a resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExternalId,
    Email,
    Phone,
    FuzzyName,
    NewCustomer,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalId => "external_id",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::FuzzyName => "fuzzy_name",
            Self::NewCustomer => "new_customer",
        }
    }
}

/// Case-fold and trim an email address.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// E.164-like phone normalization: strip everything but digits and a leading
/// `+`, prepend the country prefix to bare 10-digit numbers, and otherwise
/// ensure a leading `+`. Idempotent.
pub fn normalize_phone(raw: &str, default_prefix: &str) -> String {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return String::new();
    }
    if has_plus {
        return format!("+{digits}");
    }
    if digits.len() == 10 {
        return format!("{default_prefix}{digits}");
    }
    format!("+{digits}")
}

/// Normalized Levenshtein similarity over case-folded names:
/// `1 − distance / max(len)`, in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

/// Fuzzy matches are only kept above this similarity.
pub const FUZZY_NAME_THRESHOLD: f64 = 0.70;

/// Runner-up suggestions returned alongside the best fuzzy match.
pub const FUZZY_SUGGESTION_LIMIT: usize = 3;

#[cfg(test)]
mod tests {
    use super::{name_similarity, normalize_email, normalize_phone, DEFAULT_COUNTRY_PREFIX};

    #[test]
    fn phone_normalization_strips_formatting() {
        assert_eq!(normalize_phone("+52 (55) 1234-5678", DEFAULT_COUNTRY_PREFIX), "+525512345678");
        assert_eq!(normalize_phone("5215512345678", DEFAULT_COUNTRY_PREFIX), "+5215512345678");
    }

    #[test]
    fn bare_ten_digit_numbers_get_country_prefix() {
        assert_eq!(normalize_phone("5512345678", DEFAULT_COUNTRY_PREFIX), "+525512345678");
        assert_eq!(normalize_phone("(551) 234-5678", DEFAULT_COUNTRY_PREFIX), "+525512345678");
    }

    #[test]
    fn phone_normalization_is_idempotent() {
        for raw in ["5512345678", "+52 55 1234 5678", "5215512345678", "1-800-555-0100"] {
            let once = normalize_phone(raw, DEFAULT_COUNTRY_PREFIX);
            let twice = normalize_phone(&once, DEFAULT_COUNTRY_PREFIX);
            assert_eq!(once, twice, "normalize should be idempotent for {raw}");
        }
    }

    #[test]
    fn empty_phone_normalizes_to_empty() {
        assert_eq!(normalize_phone("   ", DEFAULT_COUNTRY_PREFIX), "");
        assert_eq!(normalize_phone("ext.", DEFAULT_COUNTRY_PREFIX), "");
    }

    #[test]
    fn email_normalization_case_folds() {
        assert_eq!(normalize_email("  Ana.Lopez@Example.COM "), "ana.lopez@example.com");
    }

    #[test]
    fn name_similarity_matches_spec_formula() {
        // "ana lopez" vs "ana loprz": distance 1 over length 9.
        let similarity = name_similarity("Ana Lopez", "ana loprz");
        assert!((similarity - (1.0 - 1.0 / 9.0)).abs() < 1e-9);
        assert_eq!(name_similarity("Ana", ""), 0.0);
        assert!((name_similarity("Carlos", "carlos") - 1.0).abs() < 1e-9);
    }
}
