// Lambda event classification
//
// The function is subscribed to two triggers: the SNS topic announcing new
// event files (rollup) and S3 ObjectCreated notifications on the own-account
// upload bucket (forward). A message body sent directly (console or CLI
// invoke) also runs the rollup.

use audit2rollup_handlers::{InboundMessage, RollupError, UploadedObject};
use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use aws_lambda_events::event::sns::{SnsEvent, SnsRecord};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Invocation {
    /// Parsed message bodies, in record order
    Rollup(Vec<InboundMessage>),
    Forward(Vec<UploadedObject>),
}

/// Trigger payloads; a bare message body is tried first since it requires `s3_objects`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TriggerEvent {
    Direct(InboundMessage),
    Sns(Box<SnsEvent>),
    S3(Box<S3Event>),
}

pub(crate) fn classify(event: Value) -> Result<Invocation, RollupError> {
    let trigger = match TriggerEvent::deserialize(&event) {
        Ok(trigger) => trigger,
        Err(_) => return Err(diagnose(&event)),
    };

    match trigger {
        TriggerEvent::Sns(event) => {
            if event.records.is_empty() {
                return Err(RollupError::schema("event has no Records"));
            }
            event
                .records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    InboundMessage::parse(&record.sns.message).map_err(|e| {
                        RollupError::schema(format!("Records[{index}].Sns.Message: {e}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Invocation::Rollup)
        }
        TriggerEvent::S3(event) => {
            if event.records.is_empty() {
                return Err(RollupError::schema("event has no Records"));
            }
            event
                .records
                .into_iter()
                .enumerate()
                .map(|(index, record)| uploaded_object(index, record))
                .collect::<Result<Vec<_>, _>>()
                .map(Invocation::Forward)
        }
        TriggerEvent::Direct(message) => Ok(Invocation::Rollup(vec![message])),
    }
}

fn uploaded_object(index: usize, record: S3EventRecord) -> Result<UploadedObject, RollupError> {
    let key = record
        .s3
        .object
        .key
        .ok_or_else(|| RollupError::schema(format!("Records[{index}].s3.object.key is missing")))?;
    Ok(UploadedObject {
        bucket: record.s3.bucket.name.filter(|name| !name.is_empty()),
        key: decode_object_key(&key)?,
    })
}

/// Name the first record that matches no trigger shape
fn diagnose(event: &Value) -> RollupError {
    if event.get("s3_objects").is_some() || event.get("s3_bucket").is_some() {
        return match InboundMessage::deserialize(event) {
            Ok(_) => RollupError::schema("invalid message body"),
            Err(e) => RollupError::schema(e.to_string()),
        };
    }

    let Some(records) = event.get("Records").and_then(Value::as_array) else {
        return RollupError::schema("unrecognised event: expected SNS or S3 Records");
    };

    for (index, record) in records.iter().enumerate() {
        if record.get("Sns").is_some() {
            if let Err(e) = SnsRecord::deserialize(record) {
                return RollupError::schema(format!("Records[{index}] is not an SNS record: {e}"));
            }
        } else if record.get("s3").is_some() {
            if let Err(e) = S3EventRecord::deserialize(record) {
                return RollupError::schema(format!("Records[{index}] is not an S3 record: {e}"));
            }
        } else {
            return RollupError::schema(format!(
                "Records[{index}] is neither an SNS nor an S3 notification"
            ));
        }
    }
    RollupError::schema("Records mix SNS and S3 notifications")
}

/// S3 notifications carry form-encoded keys: spaces arrive as '+'
fn decode_object_key(raw: &str) -> Result<String, RollupError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|e| RollupError::schema(format!("object key '{raw}' is not valid UTF-8: {e}")))
}


#[cfg(test)]
mod tests {
    use super::fixtures::{s3_record, sns_record};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sns_records_are_collected_in_order() {
        let event = json!({
            "Records": [
                sns_record(json!(r#"{"s3_objects": ["a.csv"]}"#)),
                sns_record(json!(r#"{"s3_bucket": "audit-source", "s3_objects": ["b.csv"]}"#)),
            ]
        });

        let Invocation::Rollup(messages) = classify(event).unwrap() else {
            panic!("expected rollup invocation");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].s3_objects, vec!["b.csv".to_string()]);
        assert_eq!(messages[1].bucket_name(), Some("audit-source"));
    }

    #[test]
    fn test_sns_message_without_objects_names_the_record() {
        let event = json!({
            "Records": [
                sns_record(json!(r#"{"s3_objects": ["a.csv"]}"#)),
                sns_record(json!(r#"{"s3_bucket": "audit-source"}"#)),
            ]
        });
        let err = classify(event).unwrap_err();
        assert_eq!(err.error_type(), "SchemaError");
        assert!(err.to_string().contains("Records[1].Sns.Message"));
    }

    #[test]
    fn test_sns_record_without_message_is_schema_error() {
        let event = json!({"Records": [sns_record(Value::Null)]});
        let err = classify(event).unwrap_err();
        assert_eq!(err.error_type(), "SchemaError");
        assert!(err.to_string().contains("Records[0]"));
    }

    #[test]
    fn test_s3_record_key_is_decoded() {
        let event = json!({
            "Records": [s3_record(json!({
                "key": "2021-01-01T12%3A01%3A31/audit+log.csv",
                "size": 1024,
                "eTag": "0123456789abcdef0123456789abcdef",
                "sequencer": "0A1B2C3D4E5F678901"
            }))]
        });

        let Invocation::Forward(objects) = classify(event).unwrap() else {
            panic!("expected forward invocation");
        };
        assert_eq!(
            objects,
            vec![UploadedObject {
                bucket: Some("uploads".to_string()),
                key: "2021-01-01T12:01:31/audit log.csv".to_string(),
            }]
        );
    }

    #[test]
    fn test_s3_record_without_key_is_schema_error() {
        let event = json!({"Records": [s3_record(json!({"size": 1024}))]});
        let err = classify(event).unwrap_err();
        assert!(matches!(err, RollupError::Schema { .. }));
        assert!(err.to_string().contains("Records[0].s3.object.key"));
    }

    #[test]
    fn test_direct_message_is_a_rollup() {
        let event = json!({"s3_bucket": "audit-source", "s3_objects": ["a.csv"]});
        let Invocation::Rollup(messages) = classify(event).unwrap() else {
            panic!("expected rollup invocation");
        };
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_direct_message_without_objects_is_schema_error() {
        let err = classify(json!({"s3_bucket": "audit-source"})).unwrap_err();
        assert!(err.to_string().contains("s3_objects"));
    }

    #[test]
    fn test_unknown_events_are_rejected() {
        assert!(classify(json!({"Records": []})).is_err());
        assert!(classify(json!({"Records": [{"eventSource": "aws:sqs"}]})).is_err());
        assert!(classify(json!({"detail-type": "Scheduled Event"})).is_err());
    }
}
