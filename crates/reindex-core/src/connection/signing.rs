//! AWS SigV4 request signing for managed search domains

use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningParams, SigningSettings};
use aws_sigv4::sign::v4;
use reindex_common::{ReindexError, Result};
use std::time::SystemTime;
use tracing::debug;

/// Signing service name of managed Elasticsearch / OpenSearch domains
const SERVICE_NAME: &str = "es";

/// Credentials provider name reported to the AWS SDK
const PROVIDER_NAME: &str = "es-reindex";

/// Where signing credentials come from
#[derive(Clone, PartialEq, Eq)]
pub enum AwsCredentialSource {
    /// Explicit key pair from the command line
    Static {
        access_key: String,
        secret_key: String,
    },
    /// Default provider chain (environment, profile, instance metadata)
    Ambient,
}

impl std::fmt::Debug for AwsCredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static { access_key, .. } => f
                .debug_struct("Static")
                .field("access_key", access_key)
                .field("secret_key", &"<redacted>")
                .finish(),
            Self::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Signing parameters attached to a [`ConnectionDescriptor`](super::ConnectionDescriptor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSigning {
    pub region: String,
    pub credentials: AwsCredentialSource,
}

/// Signs outgoing requests with resolved credentials
pub struct RequestSigner {
    region: String,
    credentials: Credentials,
}

impl RequestSigner {
    /// Resolve credentials, querying the default provider chain when needed
    pub async fn resolve(signing: &AwsSigning) -> Result<Self> {
        let credentials = match &signing.credentials {
            AwsCredentialSource::Static {
                access_key,
                secret_key,
            } => Credentials::new(access_key, secret_key, None, None, PROVIDER_NAME),
            AwsCredentialSource::Ambient => {
                debug!(region = %signing.region, "Discovering AWS credentials");
                let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(signing.region.clone()))
                    .load()
                    .await;
                let provider = sdk_config.credentials_provider().ok_or_else(|| {
                    ReindexError::signing("no AWS credentials provider is configured")
                })?;
                provider
                    .provide_credentials()
                    .await
                    .map_err(ReindexError::signing)?
            },
        };

        Ok(Self {
            region: signing.region.clone(),
            credentials,
        })
    }

    /// Compute the signature headers for one request
    pub fn sign(&self, method: &str, url: &str, body: &[u8]) -> Result<Vec<(String, String)>> {
        let identity = self.credentials.clone().into();
        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SERVICE_NAME)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(ReindexError::signing)?
            .into();

        let request = SignableRequest::new(
            method,
            url,
            std::iter::empty(),
            SignableBody::Bytes(body),
        )
        .map_err(ReindexError::signing)?;

        let (instructions, _signature) = sign(request, &params)
            .map_err(ReindexError::signing)?
            .into_parts();

        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}
