use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

pub mod s3;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ObjectStorageError {
    #[error("invalid bucket name `{bucket_name}`: {raw_error_message}")]
    InvalidBucketName {
        bucket_name: String,
        raw_error_message: String,
    },

    #[error("cannot get object `{object_key}` from bucket `{bucket_name}`: {raw_error_message}")]
    CannotGetObject {
        bucket_name: String,
        object_key: String,
        raw_error_message: String,
    },

    #[error("cannot put object `{object_key}` into bucket `{bucket_name}`: {raw_error_message}")]
    CannotPutObject {
        bucket_name: String,
        object_key: String,
        raw_error_message: String,
    },

    #[error("cannot encode object `{object_key}`: {raw_error_message}")]
    CannotEncodeObject {
        object_key: String,
        raw_error_message: String,
    },
}

/// Byte-level object storage. Key builders partition buckets per tenant and
/// job, so concurrent jobs on different tenants never contend on a key.
pub trait ObjectStorage: Send + Sync {
    fn get_object(&self, bucket_name: &str, object_key: &str) -> Result<Option<Vec<u8>>, ObjectStorageError>;
    fn put_object(&self, bucket_name: &str, object_key: &str, body: Vec<u8>) -> Result<(), ObjectStorageError>;
    fn delete_object(&self, bucket_name: &str, object_key: &str) -> Result<(), ObjectStorageError>;
}

pub fn gz_put_json(
    storage: &dyn ObjectStorage,
    bucket_name: &str,
    object_key: &str,
    value: &serde_json::Value,
) -> Result<(), ObjectStorageError> {
    let encode_err = |raw_error_message: String| ObjectStorageError::CannotEncodeObject {
        object_key: object_key.to_string(),
        raw_error_message,
    };
    let raw = serde_json::to_vec(value).map_err(|e| encode_err(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(|e| encode_err(e.to_string()))?;
    let compressed = encoder.finish().map_err(|e| encode_err(e.to_string()))?;
    storage.put_object(bucket_name, object_key, compressed)
}

pub fn gz_get_json(
    storage: &dyn ObjectStorage,
    bucket_name: &str,
    object_key: &str,
) -> Result<Option<serde_json::Value>, ObjectStorageError> {
    let body = match storage.get_object(bucket_name, object_key)? {
        Some(body) => body,
        None => return Ok(None),
    };
    let cannot_get = |raw_error_message: String| ObjectStorageError::CannotGetObject {
        bucket_name: bucket_name.to_string(),
        object_key: object_key.to_string(),
        raw_error_message,
    };
    let mut decoder = GzDecoder::new(body.as_slice());
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw).map_err(|e| cannot_get(e.to_string()))?;
    serde_json::from_slice(&raw).map(Some).map_err(|e| cannot_get(e.to_string()))
}

#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl ObjectStorage for InMemoryObjectStorage {
    fn get_object(&self, bucket_name: &str, object_key: &str) -> Result<Option<Vec<u8>>, ObjectStorageError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket_name.to_string(), object_key.to_string()))
            .cloned())
    }

    fn put_object(&self, bucket_name: &str, object_key: &str, body: Vec<u8>) -> Result<(), ObjectStorageError> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket_name.to_string(), object_key.to_string()), body);
        Ok(())
    }

    fn delete_object(&self, bucket_name: &str, object_key: &str) -> Result<(), ObjectStorageError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket_name.to_string(), object_key.to_string()));
        Ok(())
    }
}
