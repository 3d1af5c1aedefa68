/*!
Unit tests for the object-store backend against a mocked client.
*/

#[cfg(test)]
mod tests {
    use super::super::object_store::{
        MockObjectStoreClient, ObjectStoreBackend, PutObjectResponse,
    };
    use super::super::{SaveResult, StorageBackend, WriteRequest};
    use crate::config::Config;
    use crate::context::Stage;
    use crate::metadata::NormalizedMetadata;
    use crate::observability::{RecordingSink, SaveEvent};
    use crate::payload::RawPayload;
    use crate::PersistError;

    fn config() -> Config {
        Config::new()
            .with("extractor_SAVE_DATA_SERVICE", "s3")
            .with("extractor_SAVE_DATA_BUCKET_NAME", "records")
    }

    fn metadata() -> NormalizedMetadata {
        let mut metadata = NormalizedMetadata::new();
        metadata.insert("n".to_string(), "5".to_string());
        metadata
    }

    fn write_with<C: super::super::ObjectStoreClient>(
        backend: &ObjectStoreBackend<C>,
        config: &Config,
        sink: &RecordingSink,
    ) -> crate::Result<SaveResult> {
        let payload = RawPayload::text(r#"{"title":"a"}"#);
        let metadata = metadata();
        backend.write(&WriteRequest {
            stage: Stage::Extractor,
            config,
            filename: "products/1.json",
            payload: &payload,
            content_type: "application/json",
            metadata: &metadata,
            sink,
        })
    }

    #[test]
    fn test_put_receives_bucket_key_body_and_metadata() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_put_object()
            .withf(|req| {
                req.bucket == "records"
                    && req.key == "products/1.json"
                    && req.body.as_ref() == br#"{"title":"a"}"#
                    && req.content_type == "application/json"
                    && req.metadata.get("n").map(String::as_str) == Some("5")
            })
            .times(1)
            .returning(|_| Ok(PutObjectResponse { status_code: 200 }));

        let backend = ObjectStoreBackend::new(client);
        let sink = RecordingSink::new();
        let result = write_with(&backend, &config(), &sink).unwrap();

        assert_eq!(
            result,
            SaveResult::S3 {
                bucket: "records".to_string(),
                key: "products/1.json".to_string()
            }
        );
        assert_eq!(
            sink.events(),
            vec![SaveEvent::ObjectStoreResponse {
                bucket: "records".to_string(),
                key: "products/1.json".to_string(),
                status: 200,
            }]
        );
    }

    #[test]
    fn test_non_success_status_is_not_an_error() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_put_object()
            .times(1)
            .returning(|_| Ok(PutObjectResponse { status_code: 503 }));

        let backend = ObjectStoreBackend::new(client);
        let sink = RecordingSink::new();
        let result = write_with(&backend, &config(), &sink);

        assert!(matches!(result, Ok(SaveResult::S3 { .. })));
        assert_eq!(sink.non_success_statuses(), vec![503]);
    }

    #[test]
    fn test_strict_status_escalates() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_put_object()
            .times(1)
            .returning(|_| Ok(PutObjectResponse { status_code: 403 }));

        let backend = ObjectStoreBackend::new(client).strict_status(true);
        let sink = RecordingSink::new();
        let result = write_with(&backend, &config(), &sink);

        assert!(matches!(
            result,
            Err(PersistError::ObjectStoreStatus { status: 403, .. })
        ));
        assert_eq!(sink.non_success_statuses(), vec![403]);
    }

    #[test]
    fn test_transport_error_propagates() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_put_object()
            .times(1)
            .returning(|_| Err(PersistError::storage("connection refused")));

        let backend = ObjectStoreBackend::new(client);
        let sink = RecordingSink::new();
        let result = write_with(&backend, &config(), &sink);

        assert!(matches!(result, Err(PersistError::Storage(_))));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_missing_bucket_skips_the_put() {
        let mut client = MockObjectStoreClient::new();
        client.expect_put_object().times(0);

        let backend = ObjectStoreBackend::new(client);
        let sink = RecordingSink::new();
        let config = Config::new().with("extractor_SAVE_DATA_SERVICE", "s3");
        let result = write_with(&backend, &config, &sink);

        assert!(matches!(
            result,
            Err(PersistError::MissingConfig(key)) if key == "extractor_SAVE_DATA_BUCKET_NAME"
        ));
    }

    #[test]
    fn test_success_range() {
        assert!(PutObjectResponse { status_code: 200 }.is_success());
        assert!(PutObjectResponse { status_code: 204 }.is_success());
        assert!(!PutObjectResponse { status_code: 301 }.is_success());
        assert!(!PutObjectResponse { status_code: 500 }.is_success());
    }
}
