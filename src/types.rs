// =============================================================================
// Shared types used across the risk engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction rail. New rails can be added without touching evaluators —
/// every statistical rule keys off `txn_type` as an enum match, falling back
/// to per-type maps keyed by its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnType {
    Neft,
    Rtgs,
    Imps,
    Upi,
    Ift,
}

impl TxnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neft => "NEFT",
            Self::Rtgs => "RTGS",
            Self::Imps => "IMPS",
            Self::Upi => "UPI",
            Self::Ift => "IFT",
        }
    }

    /// Parse a transaction type from its wire representation. Case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NEFT" => Some(Self::Neft),
            "RTGS" => Some(Self::Rtgs),
            "IMPS" => Some(Self::Imps),
            "UPI" => Some(Self::Upi),
            "IFT" => Some(Self::Ift),
            _ => None,
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::Neft, Self::Rtgs, Self::Imps, Self::Upi, Self::Ift]
    }
}

impl std::fmt::Display for TxnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for TxnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TxnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown txn type: {s}")))
    }
}

/// Immutable incoming transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub txn_id: String,
    pub client_id: String,
    pub txn_type: TxnType,
    /// Non-negative amount, in rupees.
    pub amount: f64,
    /// Epoch milliseconds. Defaults to ingress time if absent on the wire.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Beneficiary routing code, e.g. an IFSC.
    #[serde(default)]
    pub beneficiary_ifsc: Option<String>,
    /// Beneficiary account number.
    #[serde(default)]
    pub beneficiary_account: Option<String>,
}

impl Transaction {
    /// Resolve the effective timestamp, defaulting to now if absent.
    pub fn effective_timestamp_ms(&self) -> i64 {
        self.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    pub fn effective_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.effective_timestamp_ms()).unwrap_or_else(Utc::now)
    }

    /// `IFSC:Account` when both halves are present, else `None`.
    pub fn beneficiary_key(&self) -> Option<String> {
        match (&self.beneficiary_ifsc, &self.beneficiary_account) {
            (Some(ifsc), Some(acct)) if !ifsc.is_empty() && !acct.is_empty() => {
                Some(format!("{ifsc}:{acct}"))
            }
            _ => None,
        }
    }
}

/// Risk-level bucket derived solely from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Critical
        } else if score >= 60.0 {
            Self::High
        } else if score >= 30.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Action chosen by the risk scorer for a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Pass,
    Alert,
    Block,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Alert => write!(f, "ALERT"),
            Self::Block => write!(f, "BLOCK"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_type_roundtrips_through_display_and_parse() {
        for t in TxnType::all() {
            assert_eq!(TxnType::parse(&t.to_string()), Some(*t));
        }
    }

    #[test]
    fn txn_type_parse_is_case_insensitive() {
        assert_eq!(TxnType::parse("upi"), Some(TxnType::Upi));
        assert_eq!(TxnType::parse("Upi"), Some(TxnType::Upi));
    }

    #[test]
    fn txn_type_parse_rejects_unknown() {
        assert_eq!(TxnType::parse("SWIFT"), None);
    }

    #[test]
    fn beneficiary_key_requires_both_halves() {
        let mut txn = Transaction {
            txn_id: "T1".into(),
            client_id: "C1".into(),
            txn_type: TxnType::Upi,
            amount: 100.0,
            timestamp: Some(0),
            beneficiary_ifsc: Some("HDFC0001".into()),
            beneficiary_account: None,
        };
        assert_eq!(txn.beneficiary_key(), None);
        txn.beneficiary_account = Some("12345".into());
        assert_eq!(txn.beneficiary_key().as_deref(), Some("HDFC0001:12345"));
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29.99), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59.99), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(79.99), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::Critical);
    }
}
