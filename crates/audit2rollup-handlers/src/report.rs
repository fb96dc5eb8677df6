use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// Rollup and accumulator written
    Completed,
    /// Nothing new to merge; nothing written
    Skipped,
}

/// An object left out of the merge under the quarantine policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantinedObject {
    /// `s3://bucket/key`
    pub object: String,
    pub error_type: String,
    pub error: String,
}

/// Outcome of one rollup invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationReport {
    pub status: InvocationStatus,
    pub objects_requested: usize,
    pub objects_merged: Vec<String>,
    pub objects_skipped: Vec<String>,
    pub objects_quarantined: Vec<QuarantinedObject>,
    pub rows_merged: usize,
    pub accumulator_rows: usize,
    pub rollup_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollup_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulator_key: Option<String>,
}

impl InvocationReport {
    pub(crate) fn skipped(objects_requested: usize, objects_skipped: Vec<String>) -> Self {
        Self {
            status: InvocationStatus::Skipped,
            objects_requested,
            objects_merged: Vec::new(),
            objects_skipped,
            objects_quarantined: Vec::new(),
            rows_merged: 0,
            accumulator_rows: 0,
            rollup_rows: 0,
            rollup_key: None,
            accumulator_key: None,
        }
    }
}

/// Outcome of forwarding one uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    pub source_bucket: String,
    pub source_key: String,
    pub target_bucket: String,
    pub target_key: String,
    pub rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_report_serializes_without_keys() {
        let report = InvocationReport::skipped(2, vec!["a.csv".into(), "b.csv".into()]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["objects_requested"], 2);
        assert!(json.get("rollup_key").is_none());
    }
}
