use once_cell::sync::Lazy;
use regex::Regex;

/// Same high/moderate tiering as the envelope derivation step
/// (`obsgate-etl`'s `classify_pii_risk`), reused here because the
/// orchestrator's redaction middleware scrubs free-form chat content
/// rather than structured log rows and needs its own match-and-replace
/// pass instead of a classify-only call.
static HIGH_RISK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(bearer\s+[a-z0-9._\-]+|secret\s*[:=]\s*\S+|api[_-]?key\s*[:=]\s*\S+|password\s*[:=]\s*\S+|token\s*[:=]\s*\S+)")
        .expect("static high-risk pattern is valid")
});

static MODERATE_RISK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}|\+?\d{1,3}[\s.-]?\(?\d{2,4}\)?[\s.-]?\d{3,4}[\s.-]?\d{3,4}|\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b)",
    )
    .expect("static moderate-risk pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedactionTier {
    High,
    Moderate,
}

#[derive(Debug, Clone, Default)]
pub struct RedactionReport {
    pub high_matches: u32,
    pub moderate_matches: u32,
}

impl RedactionReport {
    pub fn any(&self) -> bool {
        self.high_matches > 0 || self.moderate_matches > 0
    }
}

/// Deterministic scrubber run over every message before it reaches a
/// [`Provider`](obsgate_providers::Provider) or gets persisted to the
/// session store (`spec.md` §4.7 Redaction middleware). High-risk spans
/// are replaced first so a token embedded in an email-adjacent string
/// can't leak through the moderate pass.
pub fn redact(text: &str) -> (String, RedactionReport) {
    let mut report = RedactionReport::default();

    let after_high = HIGH_RISK.replace_all(text, |caps: &regex::Captures| {
        report.high_matches += 1;
        format!("[REDACTED:{}]", tier_label(RedactionTier::High))
    });
    let after_moderate = MODERATE_RISK.replace_all(&after_high, |_: &regex::Captures| {
        report.moderate_matches += 1;
        format!("[REDACTED:{}]", tier_label(RedactionTier::Moderate))
    });

    (after_moderate.into_owned(), report)
}

fn tier_label(tier: RedactionTier) -> &'static str {
    match tier {
        RedactionTier::High => "high",
        RedactionTier::Moderate => "moderate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_token() {
        let (out, report) = redact("call failed with Bearer abc123.def456");
        assert!(out.contains("[REDACTED:high]"));
        assert!(!out.contains("abc123"));
        assert_eq!(report.high_matches, 1);
    }

    #[test]
    fn redacts_email_as_moderate() {
        let (out, report) = redact("notify jane.doe@example.com about the outage");
        assert!(out.contains("[REDACTED:moderate]"));
        assert_eq!(report.moderate_matches, 1);
        assert_eq!(report.high_matches, 0);
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let (out, report) = redact("service checkout restarted cleanly");
        assert_eq!(out, "service checkout restarted cleanly");
        assert!(!report.any());
    }

    #[test]
    fn high_risk_pass_runs_before_moderate() {
        let (out, report) = redact("token=xyz sent to jane.doe@example.com");
        assert!(out.contains("[REDACTED:high]"));
        assert!(out.contains("[REDACTED:moderate]"));
        assert_eq!(report.high_matches, 1);
        assert_eq!(report.moderate_matches, 1);
    }
}
