/*!
Amazon S3 object-store client.

Implements [`ObjectStoreClient`] on top of the official AWS SDK so that
[`ObjectStoreBackend`](super::ObjectStoreBackend) can write to S3 and
S3-compatible stores.
*/

use aws_config::SdkConfig;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use harvest_retry::{object_store_backoff_policy, permanent_error, transient_error, with_custom_backoff};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::object_store::{ObjectStoreClient, PutObjectRequest, PutObjectResponse};
use crate::{PersistError, Result};

/// Attempts per put before giving up on transport failures
const PUT_ATTEMPTS: usize = 3;

/// Runtime shared by every S3 client in the process
///
/// Built lazily so that purely local pipelines never spawn worker threads.
static SHARED_RUNTIME: Lazy<std::result::Result<Arc<Runtime>, String>> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .thread_name("harvest-s3")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| e.to_string())
});

fn shared_runtime() -> Result<Arc<Runtime>> {
    (*SHARED_RUNTIME).clone().map_err(|e| {
        PersistError::storage(format!("Failed to create async runtime for S3 client: {e}"))
    })
}

/// S3 client used by the object-store backend
///
/// Credentials come from the standard AWS provider chain:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. AWS credentials file (~/.aws/credentials)
/// 3. IAM roles for EC2 instances and ECS tasks
///
/// Puts block the calling thread on a shared runtime, so the client can be
/// used from synchronous pipeline workers.
///
/// # Example
/// ```rust,no_run
/// use harvest_core::storage::{ObjectStoreBackend, S3ObjectClient};
/// use harvest_core::BackendRegistry;
///
/// let client = S3ObjectClient::new()?;
/// let mut registry = BackendRegistry::with_local();
/// registry.register("s3", ObjectStoreBackend::new(client));
/// # Ok::<(), harvest_core::PersistError>(())
/// ```
#[derive(Debug, Clone)]
pub struct S3ObjectClient {
    client: S3Client,
    runtime: Arc<Runtime>,
}

impl S3ObjectClient {
    /// Create a client from the environment's AWS configuration
    ///
    /// # Errors
    /// Returns an error if no credentials provider is available or the
    /// runtime cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_endpoint(None)
    }

    /// Create a client, optionally pointed at an S3-compatible endpoint
    ///
    /// A custom endpoint switches to path-style addressing, which is what
    /// MinIO and LocalStack expect.
    pub fn with_endpoint(endpoint: Option<String>) -> Result<Self> {
        let runtime = shared_runtime()?;

        let sdk_config = runtime.block_on(async {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await
        });

        if sdk_config.credentials_provider().is_none() {
            return Err(PersistError::storage(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url).force_path_style(true);
        }
        let client = S3Client::from_conf(builder.build());

        info!(endpoint = endpoint.as_deref().unwrap_or("default"), "Initialized S3 client");
        Ok(Self { client, runtime })
    }

    /// Create a client with explicit AWS configuration
    pub fn with_config(config: SdkConfig) -> Result<Self> {
        let runtime = shared_runtime()?;
        let client = S3Client::new(&config);

        info!("Initialized S3 client with custom config");
        Ok(Self { client, runtime })
    }

    async fn put_once(client: S3Client, request: PutObjectRequest) -> harvest_retry::RetryResult<PutObjectResponse> {
        let metadata: HashMap<String, String> = request.metadata.into_iter().collect();

        let result = client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(request.body))
            .send()
            .await;

        match result {
            Ok(_) => Ok(PutObjectResponse { status_code: 200 }),
            Err(e) => classify_put_error(e, &request.key),
        }
    }
}

/// Split SDK failures into a store answer, a retryable failure or a hard one
///
/// A service error still carries the store's response, so it becomes a
/// status code for the backend to judge. Only transport-level failures are
/// retried.
fn classify_put_error<E>(
    error: SdkError<E, HttpResponse>,
    key: &str,
) -> harvest_retry::RetryResult<PutObjectResponse>
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match error {
        SdkError::ServiceError(ref service_err) => {
            let status_code = service_err.raw().status().as_u16();
            debug!(
                key,
                status_code,
                code = service_err.err().code().unwrap_or("unknown"),
                "S3 put_object answered with a service error"
            );
            Ok(PutObjectResponse { status_code })
        }
        SdkError::DispatchFailure(ref dispatch_err) => Err(transient_error!(
            "put_object",
            PersistError::storage(format!("S3 put_object request failed to dispatch: {dispatch_err:?}"))
        )),
        SdkError::TimeoutError(_) => Err(transient_error!(
            "put_object",
            PersistError::storage(format!("S3 put_object request timed out (key: {key})"))
        )),
        other => Err(permanent_error!(
            "put_object",
            PersistError::storage(format!("S3 put_object error: {other:?}"))
        )),
    }
}

impl ObjectStoreClient for S3ObjectClient {
    fn put_object(&self, request: &PutObjectRequest) -> Result<PutObjectResponse> {
        debug!(
            bucket = %request.bucket,
            key = %request.key,
            size = request.body.len(),
            "Starting S3 put_object operation"
        );

        let client = self.client.clone();
        let request = request.clone();
        let outcome = self.runtime.block_on(with_custom_backoff(
            "put_object",
            object_store_backoff_policy(),
            PUT_ATTEMPTS,
            move |_attempt| Box::pin(Self::put_once(client.clone(), request.clone())),
        ));

        outcome.map_err(|e| PersistError::storage(e.to_string()))
    }
}
