/*!
Object-store storage backend.

The backend is written against the [`ObjectStoreClient`] capability rather than
a concrete SDK, so the same write path serves S3, S3-compatible stores and test
doubles.
*/

use bytes::Bytes;
use std::sync::Arc;

use super::{SaveResult, StorageBackend, WriteRequest};
use crate::metadata::NormalizedMetadata;
use crate::{PersistError, Result};

/// A single object put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub metadata: NormalizedMetadata,
}

/// What the store answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutObjectResponse {
    pub status_code: u16,
}

impl PutObjectResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Capability to put an object into a remote store
///
/// Implementations return `Err` only when no response was obtained (transport
/// failure, credentials). A response with any status code is `Ok`.
#[cfg_attr(test, mockall::automock)]
pub trait ObjectStoreClient: Send + Sync {
    fn put_object(&self, request: &PutObjectRequest) -> Result<PutObjectResponse>;
}

impl<C: ObjectStoreClient + ?Sized> ObjectStoreClient for Arc<C> {
    fn put_object(&self, request: &PutObjectRequest) -> Result<PutObjectResponse> {
        (**self).put_object(request)
    }
}

/// Backend that writes artifacts as objects
///
/// The bucket comes from `{stage}_SAVE_DATA_BUCKET_NAME`. A non-success status
/// is reported to the event sink and, unless [`strict_status`] is enabled,
/// the write still returns a [`SaveResult`].
///
/// [`strict_status`]: ObjectStoreBackend::strict_status
#[derive(Debug)]
pub struct ObjectStoreBackend<C> {
    client: C,
    strict_status: bool,
}

impl<C: ObjectStoreClient> ObjectStoreBackend<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            strict_status: false,
        }
    }

    /// Escalate non-success statuses to `PersistError::ObjectStoreStatus`
    pub fn strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: ObjectStoreClient> StorageBackend for ObjectStoreBackend<C> {
    fn write(&self, request: &WriteRequest<'_>) -> Result<SaveResult> {
        let bucket = request.config.bucket_name(request.stage)?.to_string();

        let put = PutObjectRequest {
            bucket: bucket.clone(),
            key: request.filename.to_string(),
            body: Bytes::copy_from_slice(&request.payload.encode().bytes),
            content_type: request.content_type.to_string(),
            metadata: request.metadata.clone(),
        };

        let response = self.client.put_object(&put)?;
        request
            .sink
            .object_store_response(&bucket, request.filename, response.status_code);

        if self.strict_status && !response.is_success() {
            return Err(PersistError::ObjectStoreStatus {
                bucket,
                key: put.key,
                status: response.status_code,
            });
        }

        Ok(SaveResult::S3 {
            bucket,
            key: put.key,
        })
    }
}
