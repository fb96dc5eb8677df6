// Cross-account credential exchange
//
// A role identifier is traded for a time-scoped credential through STS
// AssumeRole. The base identity comes from the standard AWS provider chain
// (the Lambda execution role in production).

use crate::error::{Result, StorageError};
use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::SdkConfig;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use chrono::{DateTime, Utc};

pub const DEFAULT_SESSION_NAME: &str = "audit2rollup";

/// Temporary credential scoped to one assumed role
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredential {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl ScopedCredential {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
            expiry: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl From<&Credentials> for ScopedCredential {
    fn from(creds: &Credentials) -> Self {
        Self {
            access_key: creds.access_key_id().to_string(),
            secret_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
            expiry: creds.expiry().map(DateTime::<Utc>::from),
        }
    }
}

/// Exchanges a role identifier for a scoped credential
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn assume_role(&self, role_arn: &str) -> Result<ScopedCredential>;
}

/// STS-backed provider
pub struct StsCredentialProvider {
    sdk_config: SdkConfig,
    session_name: String,
}

impl StsCredentialProvider {
    /// Load the base identity from the environment (Lambda execution role, profile, etc.)
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::from_env().load().await;
        Self::new(sdk_config)
    }

    pub fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StsCredentialProvider {
    async fn assume_role(&self, role_arn: &str) -> Result<ScopedCredential> {
        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(&self.session_name)
            .configure(&self.sdk_config)
            .build()
            .await;

        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| StorageError::credentials(role_arn, e))?;

        tracing::debug!(
            role = %role_arn,
            expiry = ?credentials.expiry(),
            "Assumed cross-account role"
        );

        Ok(ScopedCredential::from(&credentials))
    }
}

/// Hands out a fixed credential regardless of role (local runs and tests)
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: ScopedCredential,
}

impl StaticCredentialProvider {
    pub fn new(credential: ScopedCredential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn assume_role(&self, _role_arn: &str) -> Result<ScopedCredential> {
        Ok(self.credential.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let credential = ScopedCredential::new("AKIAEXAMPLE", "very-secret").with_session_token("tok");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("AKIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("tok\""));
    }

    #[test]
    fn test_from_sdk_credentials() {
        let sdk = Credentials::new("AKIA", "secret", Some("session".to_string()), None, "test");
        let credential = ScopedCredential::from(&sdk);
        assert_eq!(credential.access_key, "AKIA");
        assert_eq!(credential.secret_key, "secret");
        assert_eq!(credential.session_token.as_deref(), Some("session"));
        assert!(credential.expiry.is_none());
    }

    #[tokio::test]
    async fn test_static_provider_ignores_role() {
        let provider = StaticCredentialProvider::new(ScopedCredential::new("a", "b"));
        let credential = provider.assume_role("arn:aws:iam::1:role/any").await.unwrap();
        assert_eq!(credential.access_key, "a");
    }
}
