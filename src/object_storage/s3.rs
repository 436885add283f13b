use retry::delay::Fixed;
use std::io::Read;
use std::str::FromStr;

use rusoto_core::{Client, HttpClient, Region as RusotoRegion, RusotoError};
use rusoto_credential::StaticProvider;
use rusoto_s3::{DeleteObjectRequest, GetObjectError, GetObjectRequest, PutObjectRequest, S3 as RusotoS3, S3Client, StreamingBody};

use crate::object_storage::{ObjectStorage, ObjectStorageError};
use crate::runtime::block_on;

struct StaticKeys {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

pub struct S3 {
    credentials: Option<StaticKeys>,
    region: String,
}

impl S3 {
    pub fn new(
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
        region: String,
    ) -> Self {
        S3 {
            credentials: Some(StaticKeys {
                access_key_id,
                secret_access_key,
                session_token,
            }),
            region,
        }
    }

    /// Uses the instance's default credentials chain.
    pub fn from_default_chain(region: String) -> Self {
        S3 {
            credentials: None,
            region,
        }
    }

    fn get_s3_client(&self) -> S3Client {
        let region = RusotoRegion::from_str(&self.region).unwrap_or_default();
        match &self.credentials {
            Some(keys) => {
                let credentials = StaticProvider::new(
                    keys.access_key_id.to_string(),
                    keys.secret_access_key.to_string(),
                    keys.session_token.clone(),
                    None,
                );
                let client = Client::new_with(credentials, HttpClient::new().expect("unable to create new Http client"));
                S3Client::new_with_client(client, region)
            }
            None => S3Client::new(region),
        }
    }

    fn is_bucket_name_valid(bucket_name: &str) -> Result<(), ObjectStorageError> {
        if bucket_name.is_empty() {
            return Err(ObjectStorageError::InvalidBucketName {
                bucket_name: bucket_name.to_string(),
                raw_error_message: "bucket name cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl ObjectStorage for S3 {
    fn get_object(&self, bucket_name: &str, object_key: &str) -> Result<Option<Vec<u8>>, ObjectStorageError> {
        S3::is_bucket_name_valid(bucket_name)?;

        let s3_client = self.get_s3_client();
        let cannot_get = |raw_error_message: String| ObjectStorageError::CannotGetObject {
            bucket_name: bucket_name.to_string(),
            object_key: object_key.to_string(),
            raw_error_message,
        };

        match block_on(s3_client.get_object(GetObjectRequest {
            bucket: bucket_name.to_string(),
            key: object_key.to_string(),
            expected_bucket_owner: None,
            ..Default::default()
        })) {
            Ok(res) => {
                let mut stream = match res.body {
                    Some(b) => b.into_blocking_read(),
                    None => return Err(cannot_get("Cannot get response body".to_string())),
                };
                let mut body = Vec::new();
                stream
                    .read_to_end(&mut body)
                    .map_err(|e| cannot_get(format!("Cannot read response body: {e}")))?;
                Ok(Some(body))
            }
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => Ok(None),
            Err(e) => Err(cannot_get(e.to_string())),
        }
    }

    fn put_object(&self, bucket_name: &str, object_key: &str, body: Vec<u8>) -> Result<(), ObjectStorageError> {
        S3::is_bucket_name_valid(bucket_name)?;

        let s3_client = self.get_s3_client();

        // report writes must survive transient S3 hiccups
        match retry::retry(Fixed::from_millis(1000).take(3), || {
            block_on(s3_client.put_object(PutObjectRequest {
                bucket: bucket_name.to_string(),
                key: object_key.to_string(),
                body: Some(StreamingBody::from(body.clone())),
                expected_bucket_owner: None,
                ..Default::default()
            }))
        }) {
            Ok(_) => Ok(()),
            Err(e) => Err(ObjectStorageError::CannotPutObject {
                bucket_name: bucket_name.to_string(),
                object_key: object_key.to_string(),
                raw_error_message: e.to_string(),
            }),
        }
    }

    fn delete_object(&self, bucket_name: &str, object_key: &str) -> Result<(), ObjectStorageError> {
        S3::is_bucket_name_valid(bucket_name)?;

        let s3_client = self.get_s3_client();

        match block_on(s3_client.delete_object(DeleteObjectRequest {
            bucket: bucket_name.to_string(),
            key: object_key.to_string(),
            expected_bucket_owner: None,
            ..Default::default()
        })) {
            Ok(_) => Ok(()),
            Err(e) => Err(ObjectStorageError::CannotPutObject {
                bucket_name: bucket_name.to_string(),
                object_key: object_key.to_string(),
                raw_error_message: e.to_string(),
            }),
        }
    }
}
