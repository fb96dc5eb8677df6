// Aggregation rules applied per column when resampling
//
// The default rule set collects distinct values for identity/metadata columns
// and sums the error flag. Columns without a rule are handled by an explicit
// UnmappedColumnPolicy.

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

/// Default temporal key column
pub const DEFAULT_TIME_COLUMN: &str = "eventTime";

/// Reduction applied to a column within one time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Distinct non-null values, first-seen order
    Unique,
    /// Numeric sum (booleans count as 0/1)
    Sum,
}

impl std::fmt::Display for Reduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reduction::Unique => write!(f, "unique"),
            Reduction::Sum => write!(f, "sum"),
        }
    }
}

impl std::str::FromStr for Reduction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unique" | "distinct" => Ok(Reduction::Unique),
            "sum" => Ok(Reduction::Sum),
            _ => Err(format!("Unsupported reduction: {}. Supported: unique, sum", s)),
        }
    }
}

/// What to do with columns that have no aggregation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedColumnPolicy {
    /// Exclude the column from the rollup
    #[default]
    Drop,
    /// Pick a reduction from the column type (numeric/boolean: sum, otherwise unique)
    Infer,
    /// Fail the resample
    Reject,
}

impl std::fmt::Display for UnmappedColumnPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmappedColumnPolicy::Drop => write!(f, "drop"),
            UnmappedColumnPolicy::Infer => write!(f, "infer"),
            UnmappedColumnPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for UnmappedColumnPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(UnmappedColumnPolicy::Drop),
            "infer" => Ok(UnmappedColumnPolicy::Infer),
            "reject" => Ok(UnmappedColumnPolicy::Reject),
            _ => Err(format!(
                "Unsupported unmapped column policy: {}. Supported: drop, infer, reject",
                s
            )),
        }
    }
}

/// A single column → reduction mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub column: String,
    pub reduction: Reduction,
}

impl ColumnRule {
    pub fn new(column: impl Into<String>, reduction: Reduction) -> Self {
        Self {
            column: column.into(),
            reduction,
        }
    }
}

/// Ordered set of column rules plus the unmapped-column policy
///
/// Rule order determines output column order in the rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRules {
    rules: Vec<ColumnRule>,
    unmapped: UnmappedColumnPolicy,
}

impl AggregationRules {
    /// Build rules from an ordered list. Later duplicates of a column replace earlier ones.
    pub fn new(rules: Vec<ColumnRule>, unmapped: UnmappedColumnPolicy) -> Self {
        let mut deduped: Vec<ColumnRule> = Vec::with_capacity(rules.len());
        for rule in rules {
            match deduped.iter_mut().find(|r| r.column == rule.column) {
                Some(existing) => existing.reduction = rule.reduction,
                None => deduped.push(rule),
            }
        }
        Self {
            rules: deduped,
            unmapped,
        }
    }

    pub fn rules(&self) -> &[ColumnRule] {
        &self.rules
    }

    pub fn unmapped_policy(&self) -> UnmappedColumnPolicy {
        self.unmapped
    }

    pub fn with_unmapped_policy(mut self, policy: UnmappedColumnPolicy) -> Self {
        self.unmapped = policy;
        self
    }

    pub fn reduction_for(&self, column: &str) -> Option<Reduction> {
        self.rules
            .iter()
            .find(|r| r.column == column)
            .map(|r| r.reduction)
    }
}

impl Default for AggregationRules {
    fn default() -> Self {
        Self::new(default_column_rules(), UnmappedColumnPolicy::default())
    }
}

/// Rules for CloudTrail-style audit events
pub fn default_column_rules() -> Vec<ColumnRule> {
    vec![
        ColumnRule::new("awsRegion", Reduction::Unique),
        ColumnRule::new("userAgent", Reduction::Unique),
        ColumnRule::new("principalId", Reduction::Unique),
        ColumnRule::new("accountId", Reduction::Unique),
        ColumnRule::new("eventType", Reduction::Unique),
        ColumnRule::new("eventName", Reduction::Unique),
        ColumnRule::new("eventSource", Reduction::Unique),
        ColumnRule::new("isError", Reduction::Sum),
    ]
}

/// Reduction chosen by the `infer` policy for a column of the given type
pub fn inferred_reduction(data_type: &DataType) -> Reduction {
    if data_type.is_numeric() || matches!(data_type, DataType::Boolean) {
        Reduction::Sum
    } else {
        Reduction::Unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_order() {
        let rules = AggregationRules::default();
        let names: Vec<&str> = rules.rules().iter().map(|r| r.column.as_str()).collect();
        assert_eq!(names.first(), Some(&"awsRegion"));
        assert_eq!(names.last(), Some(&"isError"));
        assert_eq!(rules.reduction_for("isError"), Some(Reduction::Sum));
        assert_eq!(rules.reduction_for("eventName"), Some(Reduction::Unique));
        assert_eq!(rules.reduction_for("requestID"), None);
        assert_eq!(rules.unmapped_policy(), UnmappedColumnPolicy::Drop);
    }

    #[test]
    fn test_duplicate_rule_replaces_reduction() {
        let rules = AggregationRules::new(
            vec![
                ColumnRule::new("isError", Reduction::Unique),
                ColumnRule::new("awsRegion", Reduction::Unique),
                ColumnRule::new("isError", Reduction::Sum),
            ],
            UnmappedColumnPolicy::Drop,
        );
        assert_eq!(rules.rules().len(), 2);
        assert_eq!(rules.rules()[0].column, "isError");
        assert_eq!(rules.reduction_for("isError"), Some(Reduction::Sum));
    }

    #[test]
    fn test_parse_policy_and_reduction() {
        assert_eq!(
            "INFER".parse::<UnmappedColumnPolicy>().unwrap(),
            UnmappedColumnPolicy::Infer
        );
        assert!("keep".parse::<UnmappedColumnPolicy>().is_err());
        assert_eq!("distinct".parse::<Reduction>().unwrap(), Reduction::Unique);
        assert!("mean".parse::<Reduction>().is_err());
    }

    #[test]
    fn test_inferred_reduction() {
        assert_eq!(inferred_reduction(&DataType::Int64), Reduction::Sum);
        assert_eq!(inferred_reduction(&DataType::Float64), Reduction::Sum);
        assert_eq!(inferred_reduction(&DataType::Boolean), Reduction::Sum);
        assert_eq!(inferred_reduction(&DataType::Utf8), Reduction::Unique);
    }
}
