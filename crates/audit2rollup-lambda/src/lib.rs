// AWS Lambda runtime adapter
//
// One function serves both triggers: SNS notifications drive the rollup
// pipeline, S3 upload notifications drive the forwarder. Handler errors are
// returned to the runtime so the transport redelivers the event.
//
// Philosophy: Use lambda_runtime's provided tokio
// We don't add our own tokio - lambda_runtime provides it

use anyhow::{Context, Result};
use audit2rollup_config::RuntimeConfig;
use audit2rollup_handlers::{
    collect_objects, ForwardSettings, ObjectForwarder, RollupError, RollupPipeline,
};
use audit2rollup_storage::{
    BlobGateway, BucketLocation, CredentialProvider, S3GatewayFactory, StsCredentialProvider,
};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

mod events;
mod init;

pub use init::init_tracing;

use events::{classify, Invocation};

pub(crate) struct LambdaState {
    pub pipeline: Option<RollupPipeline>,
    pub forwarder: Option<ObjectForwarder>,
}

impl LambdaState {
    async fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(StsCredentialProvider::from_env().await);

        let pipeline = if config.target.bucket.is_empty() {
            None
        } else {
            let target = BlobGateway::s3(
                &BucketLocation::new(&config.target.bucket, &config.target.region)
                    .with_endpoint(config.target.endpoint.clone()),
                None,
            )
            .context("Failed to initialize target storage")?;
            let sources = Arc::new(S3GatewayFactory::new(
                &config.source.region,
                config.source.endpoint.clone(),
            ));
            Some(RollupPipeline::from_config(
                config,
                credentials.clone(),
                sources,
                target,
            ))
        };

        let forwarder = config.forward.as_ref().map(|forward| {
            let gateways = Arc::new(S3GatewayFactory::new(
                forward
                    .region
                    .clone()
                    .unwrap_or_else(|| config.source.region.clone()),
                forward.endpoint.clone(),
            ));
            ObjectForwarder::new(
                credentials.clone(),
                gateways,
                ForwardSettings::new(forward, config),
            )
        });

        Ok(Self {
            pipeline,
            forwarder,
        })
    }
}

/// Lambda handler: dispatch on the event envelope and return the handler report
async fn handle_event(
    event: LambdaEvent<Value>,
    state: Arc<LambdaState>,
) -> Result<Value, Error> {
    let (payload, context) = event.into_parts();
    let span = tracing::info_span!("invocation", request_id = %context.request_id);

    match dispatch(payload, &state).instrument(span).await {
        Ok(report) => Ok(report),
        Err(err) => {
            tracing::error!(
                error_type = err.error_type(),
                transient = err.is_transient(),
                error = %err,
                "Invocation failed"
            );
            Err(err.into())
        }
    }
}

async fn dispatch(payload: Value, state: &LambdaState) -> Result<Value, RollupError> {
    match classify(payload)? {
        Invocation::Rollup(messages) => {
            let pipeline = state
                .pipeline
                .as_ref()
                .ok_or_else(|| RollupError::config("received SNS event but no target bucket is configured"))?;
            let objects = collect_objects(&messages);
            let report = pipeline.run(objects).await?;
            to_json(&report)
        }
        Invocation::Forward(objects) => {
            let forwarder = state
                .forwarder
                .as_ref()
                .ok_or_else(|| RollupError::config("received S3 event but forwarding is not configured"))?;
            let mut reports = Vec::with_capacity(objects.len());
            for object in &objects {
                reports.push(forwarder.forward(object).await?);
            }
            to_json(&reports)
        }
    }
}

fn to_json<T: serde::Serialize>(report: &T) -> Result<Value, RollupError> {
    serde_json::to_value(report)
        .map_err(|e| RollupError::config(format!("failed to serialise report: {e}")))
}

/// Lambda runtime entry point
pub async fn run() -> Result<(), Error> {
    let config = RuntimeConfig::load()
        .map_err(|e| Error::from(format!("Failed to load configuration: {:#}", e)))?;
    init_tracing(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built_at = env!("BUILD_TIMESTAMP"),
        target_bucket = %config.target.bucket,
        source_bucket = %config.source.bucket,
        forwarding = config.forward.is_some(),
        "Starting audit2rollup Lambda"
    );

    let state = Arc::new(
        LambdaState::from_config(&config)
            .await
            .map_err(|e| Error::from(format!("Failed to initialize handlers: {:#}", e)))?,
    );

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let state = state.clone();
        async move { handle_event(event, state).await }
    }))
    .await
}
