/// Phone number normalization for caller-ID checks
///
/// Numbers arrive in whatever shape the trunk presents them: local,
/// national ("0" prefix), international ("00" prefix) or E.164 ("+").
/// Everything is folded into "+<country><rest>" before comparing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dialplan {
    /// Country code without prefix, e.g. "49"
    pub country: String,
    /// International dialing prefix, e.g. "00"
    pub intl: String,
    /// Area code without the national prefix; empty if unknown
    pub city: String,
    /// National dialing prefix, e.g. "0"
    pub nat: String,
}

impl Default for Dialplan {
    fn default() -> Self {
        Self {
            country: "49".to_string(),
            intl: "00".to_string(),
            city: String::new(),
            nat: "0".to_string(),
        }
    }
}

impl Dialplan {
    /// Normalize a number to "+<country><national number>".
    ///
    /// Separators (spaces, dashes, dots, parentheses, slashes) are dropped.
    /// Local numbers get the configured city code when one is set and are
    /// returned as plain digits otherwise.
    pub fn normalize(&self, number: &str) -> String {
        let cleaned: String = number
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();

        if let Some(rest) = cleaned.strip_prefix('+') {
            return format!("+{}", rest);
        }
        if !self.intl.is_empty() {
            if let Some(rest) = cleaned.strip_prefix(self.intl.as_str()) {
                return format!("+{}", rest);
            }
        }
        if !self.nat.is_empty() {
            if let Some(rest) = cleaned.strip_prefix(self.nat.as_str()) {
                return format!("+{}{}", self.country, rest);
            }
        }
        if !self.city.is_empty() && !cleaned.is_empty() {
            return format!("+{}{}{}", self.country, self.city, cleaned);
        }
        cleaned
    }

    /// Compare two numbers after normalization
    pub fn same_number(&self, a: &str, b: &str) -> bool {
        let a = self.normalize(a);
        !a.is_empty() && a == self.normalize(b)
    }
}

/// Mask a phone number for logging, keeping the last 4 digits.
/// Example: "+4930123456" -> "******3456"
pub fn redact_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let keep: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - 4), keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn berlin() -> Dialplan {
        Dialplan {
            city: "30".to_string(),
            ..Dialplan::default()
        }
    }

    #[test]
    fn test_normalize_forms_agree() {
        let dp = berlin();
        let canonical = "+4930123456";
        assert_eq!(dp.normalize("+49 30 123456"), canonical);
        assert_eq!(dp.normalize("0049 30 123456"), canonical);
        assert_eq!(dp.normalize("030/123456"), canonical);
        assert_eq!(dp.normalize("123456"), canonical);
    }

    #[test]
    fn test_normalize_foreign_number() {
        let dp = berlin();
        assert_eq!(dp.normalize("0041 44 1234567"), "+41441234567");
        assert!(!dp.same_number("0041441234567", "+4930123456"));
    }

    #[test]
    fn test_local_without_city_stays_plain() {
        let dp = Dialplan::default();
        assert_eq!(dp.normalize("123456"), "123456");
    }

    #[test]
    fn test_same_number_rejects_empty() {
        let dp = berlin();
        assert!(!dp.same_number("", ""));
        assert!(!dp.same_number("abc", "-"));
        assert!(dp.same_number("030 123456", "+4930123456"));
    }

    #[test]
    fn test_redact_number() {
        assert_eq!(redact_number("+4930123456"), "******3456");
        assert_eq!(redact_number("1234"), "****");
        assert_eq!(redact_number(""), "");
    }
}
