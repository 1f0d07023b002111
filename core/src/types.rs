//! Shared primitive types used across the entire pipeline.
//!
//! RULE: every categorical field is a closed enum with a stable
//! display label. Labels are what appear in feeds, narratives and
//! the database; they never change once published.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical analysis-run identifier.
pub type RunId = String;

/// A stable, unique identifier for a transaction.
pub type TransactionId = String;

macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Exact, case-sensitive label lookup.
            pub fn from_label(s: &str) -> Option<Self> {
                match s {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

labelled_enum!(
    /// Payment provider banks.
    Bank {
        Hdfc  => "HDFC",
        Sbi   => "SBI",
        Icici => "ICICI",
        Axis  => "Axis",
        Kotak => "Kotak",
    }
);

labelled_enum!(
    CardType {
        Debit     => "Debit",
        Credit    => "Credit",
        Rewards   => "Rewards",
        Corporate => "Corporate",
    }
);

labelled_enum!(
    MerchantCategory {
        Ecommerce => "E-commerce",
        Travel    => "Travel",
        Food      => "Food",
        Utilities => "Utilities",
    }
);

labelled_enum!(
    CustomerTier {
        Vip     => "VIP",
        Regular => "Regular",
        New     => "New",
    }
);

labelled_enum!(
    TxnStatus {
        Success => "SUCCESS",
        Failed  => "FAILED",
    }
);

labelled_enum!(
    /// Amount bucket used as the third clustering dimension.
    AmountBucket {
        Under100     => "<100",
        From100      => "100-1000",
        From1000     => "1000-5000",
        Over5000     => ">5000",
    }
);

impl AmountBucket {
    pub fn for_amount(amount: f64) -> Self {
        if amount < 100.0 {
            AmountBucket::Under100
        } else if amount < 1000.0 {
            AmountBucket::From100
        } else if amount < 5000.0 {
            AmountBucket::From1000
        } else {
            AmountBucket::Over5000
        }
    }
}

labelled_enum!(
    /// Coarse category that keys persistent calibration history.
    PatternType {
        BankSpike        => "bank_spike",
        MicroTransaction => "micro_transaction",
        VipAnomaly       => "vip_anomaly",
        CardTesting      => "card_testing",
        HighRiskPayment  => "high_risk_payment",
        PaymentFailure   => "payment_failure",
    }
);

/// Error code taxonomy used by the feed generator and the proposer.
pub const INFRASTRUCTURE_ERRORS: &[&str] = &[
    "TIMEOUT",
    "GATEWAY_TIMEOUT",
    "SERVICE_UNAVAILABLE",
    "SLOW_RESPONSE",
];
pub const POLICY_ERRORS: &[&str] = &["RISK_THRESHOLD_EXCEEDED", "DAILY_LIMIT_REACHED"];
pub const CUSTOMER_ERRORS: &[&str] = &[
    "INSUFFICIENT_FUNDS",
    "CARD_BLOCKED",
    "EXPIRED_CARD",
    "DECLINED",
];
pub const FRAUD_ERRORS: &[&str] = &["SUSPICIOUS_ACTIVITY", "FRAUD_CHECK_TIMEOUT"];

pub fn is_infrastructure_error(code: &str) -> bool {
    INFRASTRUCTURE_ERRORS.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for bank in Bank::ALL {
            assert_eq!(Bank::from_label(bank.label()), Some(*bank));
        }
        for pt in PatternType::ALL {
            assert_eq!(PatternType::from_label(pt.label()), Some(*pt));
        }
        assert_eq!(MerchantCategory::from_label("E-commerce"), Some(MerchantCategory::Ecommerce));
        assert_eq!(Bank::from_label("hdfc"), None);
    }

    #[test]
    fn amount_bucket_edges() {
        assert_eq!(AmountBucket::for_amount(99.99), AmountBucket::Under100);
        assert_eq!(AmountBucket::for_amount(100.0), AmountBucket::From100);
        assert_eq!(AmountBucket::for_amount(999.99), AmountBucket::From100);
        assert_eq!(AmountBucket::for_amount(1000.0), AmountBucket::From1000);
        assert_eq!(AmountBucket::for_amount(5000.0), AmountBucket::Over5000);
    }

    #[test]
    fn serde_uses_labels() {
        let json = serde_json::to_string(&AmountBucket::Over5000).unwrap();
        assert_eq!(json, "\">5000\"");
        let pt: PatternType = serde_json::from_str("\"card_testing\"").unwrap();
        assert_eq!(pt, PatternType::CardTesting);
    }
}
