use obsgate_contract::{PiiRisk, RetentionClass};
use once_cell::sync::Lazy;
use regex::Regex;

static HIGH_RISK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(bearer\s+[a-z0-9._\-]+|secret|api[_-]?key|password\s*[:=]|token\s*[:=])")
        .expect("static high-risk pattern is valid")
});

static MODERATE_RISK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}|\+?\d{1,3}[\s.-]?\(?\d{2,4}\)?[\s.-]?\d{3,4}[\s.-]?\d{3,4}|\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b)",
    )
    .expect("static moderate-risk pattern is valid")
});

static LOW_RISK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(user[_-]?id|account[_-]?id)\s*[:=]\s*\S+")
        .expect("static low-risk pattern is valid")
});

/// Regex classification over `{message, json_payload}` into
/// `{high, moderate, low, none}`, per `spec.md` §4.4 step 3. Order matters:
/// the first matching tier (high first) wins.
pub fn classify_pii_risk(message: &str, json_payload: Option<&str>) -> PiiRisk {
    let haystacks: [&str; 2] = [message, json_payload.unwrap_or("")];
    for haystack in haystacks {
        if HIGH_RISK.is_match(haystack) {
            return PiiRisk::High;
        }
    }
    for haystack in haystacks {
        if MODERATE_RISK.is_match(haystack) {
            return PiiRisk::Moderate;
        }
    }
    for haystack in haystacks {
        if LOW_RISK.is_match(haystack) {
            return PiiRisk::Low;
        }
    }
    PiiRisk::None
}

/// `privacy.retention_class = audit` iff `log_type = audit` (`spec.md` §4.4).
pub fn retention_class(log_type: &str) -> RetentionClass {
    if log_type.eq_ignore_ascii_case("audit") {
        RetentionClass::Audit
    } else {
        RetentionClass::Standard
    }
}

/// `environment` derivation: from labels first, falling back to a
/// service-name heuristic (`spec.md` §4.4 step 3).
pub fn derive_environment(labels: &[(String, String)], service_name: &str) -> String {
    if let Some((_, v)) = labels.iter().find(|(k, _)| k == "environment" || k == "env") {
        return v.clone();
    }
    let lower = service_name.to_ascii_lowercase();
    for candidate in ["prod", "staging", "dev", "test"] {
        if lower.contains(candidate) {
            return candidate.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bearer_token_as_high_risk() {
        assert_eq!(
            classify_pii_risk("auth failed: Bearer abc123.def456", None),
            PiiRisk::High
        );
    }

    #[test]
    fn detects_email_as_moderate_risk() {
        assert_eq!(
            classify_pii_risk("sent welcome mail to jane.doe@example.com", None),
            PiiRisk::Moderate
        );
    }

    #[test]
    fn detects_user_id_as_low_risk() {
        assert_eq!(
            classify_pii_risk("processed request for user_id=42", None),
            PiiRisk::Low
        );
    }

    #[test]
    fn plain_message_is_no_risk() {
        assert_eq!(classify_pii_risk("service started", None), PiiRisk::None);
    }

    #[test]
    fn high_risk_wins_over_moderate() {
        let msg = "Bearer xyz sent to jane.doe@example.com";
        assert_eq!(classify_pii_risk(msg, None), PiiRisk::High);
    }

    #[test]
    fn audit_log_type_sets_audit_retention() {
        assert_eq!(retention_class("audit"), RetentionClass::Audit);
        assert_eq!(retention_class("app"), RetentionClass::Standard);
    }

    #[test]
    fn environment_prefers_explicit_label() {
        let labels = vec![("environment".to_string(), "staging".to_string())];
        assert_eq!(derive_environment(&labels, "checkout-prod"), "staging");
    }

    #[test]
    fn environment_falls_back_to_service_name_heuristic() {
        assert_eq!(derive_environment(&[], "checkout-prod-1"), "prod");
        assert_eq!(derive_environment(&[], "mystery-svc"), "unknown");
    }
}
