use crate::constants::GLOBAL_REGION;
use crate::models::Cloud;
use crate::object_storage::{ObjectStorage, ObjectStorageError};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::ops::Sub;
use std::sync::Arc;

const META_KEY: &str = "meta.json";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ShardingError {
    #[error("no io attached to the collection")]
    NoIo,

    #[error("cannot read shard `{key}`: {raw_error_message}")]
    CannotRead { key: String, raw_error_message: String },

    #[error("cannot write shard `{key}`: {raw_error_message}")]
    CannotWrite { key: String, raw_error_message: String },
}

/// One rule's findings for one location, the unit of shard merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPart {
    pub policy: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub resources: Vec<serde_json::Value>,
}

impl ShardPart {
    fn identity(&self) -> (String, String) {
        (self.policy.clone(), self.location.clone())
    }
}

/// A partition of the finding set. Parts are keyed by (policy, location);
/// merging keeps the freshest part per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shard {
    parts: BTreeMap<(String, String), ShardPart>,
}

impl Shard {
    pub fn put(&mut self, part: ShardPart) {
        match self.parts.get(&part.identity()) {
            Some(existing) if existing.timestamp > part.timestamp => (),
            _ => {
                self.parts.insert(part.identity(), part);
            }
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = &ShardPart> {
        self.parts.values()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn merge(&mut self, other: &Shard) {
        for part in other.parts() {
            self.put(part.clone());
        }
    }

    /// Resources present in `self` but absent from `other`, per part key.
    fn subtract(&self, other: &Shard) -> Shard {
        let mut result = Shard::default();
        for (key, part) in &self.parts {
            let known: HashSet<String> = match other.parts.get(key) {
                Some(theirs) => theirs
                    .resources
                    .iter()
                    .filter_map(|r| serde_json::to_string(r).ok())
                    .collect(),
                None => HashSet::new(),
            };
            let fresh: Vec<serde_json::Value> = part
                .resources
                .iter()
                .filter(|r| {
                    serde_json::to_string(r)
                        .map(|encoded| !known.contains(&encoded))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            if !fresh.is_empty() {
                result.parts.insert(
                    key.clone(),
                    ShardPart {
                        policy: part.policy.clone(),
                        location: part.location.clone(),
                        timestamp: part.timestamp,
                        resources: fresh,
                    },
                );
            }
        }
        result
    }
}

/// Pluggable persistence for one collection prefix.
pub trait ShardsIo: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ShardingError>;
    fn write(&self, key: &str, body: Vec<u8>) -> Result<(), ShardingError>;
}

pub struct ShardsS3Io {
    bucket: String,
    root: String,
    storage: Arc<dyn ObjectStorage>,
}

impl ShardsS3Io {
    pub fn new(bucket: impl Into<String>, root: impl Into<String>, storage: Arc<dyn ObjectStorage>) -> Self {
        ShardsS3Io {
            bucket: bucket.into(),
            root: root.into(),
            storage,
        }
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}/{}", self.root, key)
    }
}

impl ShardsIo for ShardsS3Io {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ShardingError> {
        self.storage
            .get_object(&self.bucket, &self.object_key(key))
            .map_err(|err: ObjectStorageError| ShardingError::CannotRead {
                key: key.to_string(),
                raw_error_message: err.to_string(),
            })
    }

    fn write(&self, key: &str, body: Vec<u8>) -> Result<(), ShardingError> {
        self.storage
            .put_object(&self.bucket, &self.object_key(key), body)
            .map_err(|err: ObjectStorageError| ShardingError::CannotWrite {
                key: key.to_string(),
                raw_error_message: err.to_string(),
            })
    }
}

/// Findings partitioned by a stable shard index computed from the part's
/// location. AWS scans spread regions over several shards; single-region
/// clouds collapse into one.
pub struct ShardsCollection {
    shards: BTreeMap<usize, Shard>,
    meta: BTreeMap<String, serde_json::Value>,
    shard_count: usize,
    io: Option<Arc<dyn ShardsIo>>,
}

pub struct ShardsCollectionFactory;

impl ShardsCollectionFactory {
    pub fn from_cloud(cloud: Cloud) -> ShardsCollection {
        let shard_count = match cloud {
            Cloud::Aws => 16,
            Cloud::Azure | Cloud::Google | Cloud::Kubernetes => 1,
        };
        ShardsCollection {
            shards: BTreeMap::new(),
            meta: BTreeMap::new(),
            shard_count,
            io: None,
        }
    }
}

impl ShardsCollection {
    pub fn with_io(mut self, io: Arc<dyn ShardsIo>) -> Self {
        self.io = Some(io);
        self
    }

    pub fn set_io(&mut self, io: Arc<dyn ShardsIo>) {
        self.io = Some(io);
    }

    pub fn shard_index(&self, location: &str) -> usize {
        if self.shard_count == 1 || location == GLOBAL_REGION {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        location.hash(&mut hasher);
        (hasher.finish() as usize) % self.shard_count
    }

    pub fn indexes(&self) -> BTreeSet<usize> {
        self.shards.keys().copied().collect()
    }

    pub fn shard(&self, index: usize) -> Option<&Shard> {
        self.shards.get(&index)
    }

    pub fn meta(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: BTreeMap<String, serde_json::Value>) {
        self.meta = meta;
    }

    pub fn is_empty(&self) -> bool {
        self.shards.values().all(Shard::is_empty)
    }

    pub fn put_parts(&mut self, parts: impl IntoIterator<Item = ShardPart>) {
        for part in parts {
            let index = self.shard_index(&part.location);
            self.shards.entry(index).or_default().put(part);
        }
    }

    /// Merges `other` into self, freshest part per identity wins.
    pub fn update(&mut self, other: &ShardsCollection) {
        for (index, shard) in &other.shards {
            self.shards.entry(*index).or_default().merge(shard);
        }
    }

    pub fn update_meta(&mut self, meta: &BTreeMap<String, serde_json::Value>) {
        for (rule, descriptor) in meta {
            self.meta.insert(rule.clone(), descriptor.clone());
        }
    }

    fn io(&self) -> Result<&Arc<dyn ShardsIo>, ShardingError> {
        self.io.as_ref().ok_or(ShardingError::NoIo)
    }

    fn shard_key(index: usize) -> String {
        format!("{index}.json.gz")
    }

    fn encode_shard(shard: &Shard, key: &str) -> Result<Vec<u8>, ShardingError> {
        let cannot_write = |raw_error_message: String| ShardingError::CannotWrite {
            key: key.to_string(),
            raw_error_message,
        };
        let parts: Vec<&ShardPart> = shard.parts().collect();
        let raw = serde_json::to_vec(&parts).map_err(|e| cannot_write(e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).map_err(|e| cannot_write(e.to_string()))?;
        encoder.finish().map_err(|e| cannot_write(e.to_string()))
    }

    fn decode_shard(body: &[u8], key: &str) -> Result<Shard, ShardingError> {
        let cannot_read = |raw_error_message: String| ShardingError::CannotRead {
            key: key.to_string(),
            raw_error_message,
        };
        let mut decoder = GzDecoder::new(body);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).map_err(|e| cannot_read(e.to_string()))?;
        let parts: Vec<ShardPart> = serde_json::from_slice(&raw).map_err(|e| cannot_read(e.to_string()))?;
        let mut shard = Shard::default();
        for part in parts {
            shard.put(part);
        }
        Ok(shard)
    }

    /// Persists every shard. Idempotent given identical parts and meta.
    pub fn write_all(&self) -> Result<(), ShardingError> {
        let io = self.io()?;
        for (index, shard) in &self.shards {
            let key = Self::shard_key(*index);
            io.write(&key, Self::encode_shard(shard, &key)?)?;
        }
        Ok(())
    }

    pub fn write_meta(&self) -> Result<(), ShardingError> {
        let io = self.io()?;
        let raw = serde_json::to_vec(&self.meta).map_err(|e| ShardingError::CannotWrite {
            key: META_KEY.to_string(),
            raw_error_message: e.to_string(),
        })?;
        io.write(META_KEY, raw)
    }

    /// Materializes only the requested shards from storage.
    pub fn fetch_by_indexes(&mut self, indexes: impl IntoIterator<Item = usize>) -> Result<(), ShardingError> {
        let io = self.io()?.clone();
        for index in indexes {
            let key = Self::shard_key(index);
            if let Some(body) = io.read(&key)? {
                let shard = Self::decode_shard(&body, &key)?;
                self.shards.entry(index).or_default().merge(&shard);
            }
        }
        Ok(())
    }

    pub fn fetch_meta(&mut self) -> Result<(), ShardingError> {
        let io = self.io()?;
        if let Some(body) = io.read(META_KEY)? {
            self.meta = serde_json::from_slice(&body).map_err(|e| ShardingError::CannotRead {
                key: META_KEY.to_string(),
                raw_error_message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Sub<&ShardsCollection> for &ShardsCollection {
    type Output = ShardsCollection;

    /// `a - b` keeps, per shard index, the findings present in `a` but not
    /// in `b`.
    fn sub(self, rhs: &ShardsCollection) -> ShardsCollection {
        let empty = Shard::default();
        let mut shards = BTreeMap::new();
        for (index, shard) in &self.shards {
            let theirs = rhs.shards.get(index).unwrap_or(&empty);
            let difference = shard.subtract(theirs);
            if !difference.is_empty() {
                shards.insert(*index, difference);
            }
        }
        ShardsCollection {
            shards,
            meta: self.meta.clone(),
            shard_count: self.shard_count,
            io: None,
        }
    }
}
