//! Tier classification: subscription plan to priority class.
//!
//! Paid plans (pro, enterprise and anything else above free) are scheduled as
//! `high`; the free plan is scheduled as `normal`.

use std::fmt;
use std::str::FromStr;

use crate::domain::Priority;

/// Subscription plans known to the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
    /// Any other paid plan identifier
    Other(String),
}

impl Plan {
    pub fn priority(&self) -> Priority {
        match self {
            Plan::Free => Priority::Normal,
            Plan::Pro | Plan::Enterprise | Plan::Other(_) => Priority::High,
        }
    }
}

impl FromStr for Plan {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "" | "free" => Plan::Free,
            "pro" => Plan::Pro,
            "enterprise" => Plan::Enterprise,
            _ => Plan::Other(normalized),
        })
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Free => f.write_str("free"),
            Plan::Pro => f.write_str("pro"),
            Plan::Enterprise => f.write_str("enterprise"),
            Plan::Other(name) => f.write_str(name),
        }
    }
}

/// Map a subscriber plan identifier to its priority class.
pub fn classify_plan(plan: &str) -> Priority {
    match plan.parse::<Plan>() {
        Ok(plan) => plan.priority(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_is_normal() {
        assert_eq!(classify_plan("free"), Priority::Normal);
        assert_eq!(classify_plan("  FREE "), Priority::Normal);
    }

    #[test]
    fn test_empty_plan_is_normal() {
        assert_eq!(classify_plan(""), Priority::Normal);
    }

    #[test]
    fn test_paid_plans_are_high() {
        assert_eq!(classify_plan("pro"), Priority::High);
        assert_eq!(classify_plan("Enterprise"), Priority::High);
        assert_eq!(classify_plan("business"), Priority::High);
    }

    #[test]
    fn test_plan_parse_and_display() {
        assert_eq!("Pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!("team".parse::<Plan>().unwrap(), Plan::Other("team".into()));
        assert_eq!(Plan::Enterprise.to_string(), "enterprise");
    }
}
