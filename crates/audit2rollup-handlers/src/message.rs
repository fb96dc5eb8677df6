// Inbound notification payloads
//
// SNS delivers `{"s3_bucket": "...", "s3_objects": ["...", ...]}` as the
// message body. Only `s3_objects` is required; the bucket may be a plain name
// or an S3 ARN.

use crate::error::{Result, RollupError};
use serde::Deserialize;
use std::collections::HashSet;

const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub s3_bucket: Option<String>,
    pub s3_objects: Vec<String>,
}

impl InboundMessage {
    /// Parse one message body
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| RollupError::schema(e.to_string()))
    }

    /// Bucket name with any ARN prefix removed
    pub fn bucket_name(&self) -> Option<&str> {
        self.s3_bucket
            .as_deref()
            .map(|b| b.strip_prefix(S3_ARN_PREFIX).unwrap_or(b))
            .map(|b| b.trim_end_matches('/'))
            .filter(|b| !b.is_empty())
    }
}

/// One object to fetch; `bucket` is `None` when the message named none
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: Option<String>,
    pub key: String,
}

impl ObjectRef {
    /// Fill in `default_bucket` when the message named none
    pub fn resolve(&self, default_bucket: &str) -> Result<SourceObject> {
        let bucket = self.bucket.as_deref().unwrap_or(default_bucket);
        if bucket.is_empty() {
            return Err(RollupError::schema(format!(
                "no s3_bucket for object '{}' and no source bucket configured",
                self.key
            )));
        }
        Ok(SourceObject {
            bucket: bucket.to_string(),
            key: self.key.clone(),
        })
    }
}

/// An object whose bucket is known
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceObject {
    pub bucket: String,
    pub key: String,
}

impl SourceObject {
    /// `s3://bucket/key`; recorded in the processed-object ledger and reports
    pub fn identity(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Parse every message body before any work starts, then concatenate their
/// object lists in order with duplicates removed.
pub fn parse_messages<'a, I>(bodies: I) -> Result<Vec<ObjectRef>>
where
    I: IntoIterator<Item = &'a str>,
{
    let messages = bodies
        .into_iter()
        .map(InboundMessage::parse)
        .collect::<Result<Vec<_>>>()?;
    Ok(collect_objects(&messages))
}

/// Concatenate object lists, keeping the first occurrence of each object
pub fn collect_objects(messages: &[InboundMessage]) -> Vec<ObjectRef> {
    let mut seen = HashSet::new();
    let mut objects = Vec::new();
    for message in messages {
        let bucket = message.bucket_name().map(str::to_string);
        for key in &message.s3_objects {
            let object = ObjectRef {
                bucket: bucket.clone(),
                key: key.clone(),
            };
            if seen.insert(object.clone()) {
                objects.push(object);
            }
        }
    }
    objects
}
