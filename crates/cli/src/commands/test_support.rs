//! In-memory object store for command tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use stowage_core::{
    BucketStatus, Error, GetOptions, ListOptions, ListResult, ObjectData, ObjectInfo,
    ObjectSource, ObjectStore, PutOptions, RemotePath, Result,
};
use tokio::io::AsyncReadExt;

/// A single bucket named `bucket` holding objects in memory
pub(crate) struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, Option<String>)>>,
    page_size: usize,
    markers: Mutex<Vec<Option<String>>>,
}

impl MemoryStore {
    pub(crate) fn with_objects(objects: &[(&str, &str)]) -> Self {
        let objects = objects
            .iter()
            .map(|(k, v)| (k.to_string(), (v.as_bytes().to_vec(), None)))
            .collect();
        Self {
            objects: Mutex::new(objects),
            page_size: 1000,
            markers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn page_size(mut self, n: usize) -> Self {
        self.page_size = n;
        self
    }

    /// Markers passed to each `list_objects` call
    pub(crate) fn markers(&self) -> Vec<Option<String>> {
        self.markers.lock().unwrap().clone()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(data, _)| data.clone())
    }

    pub(crate) fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).and_then(|(_, ct)| ct.clone())
    }

    fn info(key: &str, data: &[u8], content_type: &Option<String>) -> ObjectInfo {
        let mut info = ObjectInfo::file(key, data.len() as i64);
        info.content_type = content_type.clone();
        info
    }

    fn check_bucket(path: &RemotePath) -> Result<()> {
        if path.bucket != "bucket" {
            return Err(Error::NotFound(format!("bucket {}", path.bucket)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<ObjectInfo>> {
        Ok(vec![ObjectInfo::bucket("bucket")])
    }

    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        Self::check_bucket(path)?;
        self.markers.lock().unwrap().push(options.marker.clone());

        let objects = self.objects.lock().unwrap();
        let mut matching = objects.iter().filter(|(k, _)| {
            k.starts_with(&path.key) && options.marker.as_ref().is_none_or(|m| k.as_str() > m.as_str())
        });

        let mut items = Vec::new();
        for (key, (data, ct)) in matching.by_ref().take(self.page_size) {
            let rest = &key[path.key.len()..];
            match rest.find('/') {
                Some(i) if !options.recursive => {
                    let dir = format!("{}{}", path.key, &rest[..=i]);
                    if !items.iter().any(|it: &ObjectInfo| it.key == dir) {
                        items.push(ObjectInfo::dir(dir));
                    }
                }
                _ => items.push(Self::info(key, data, ct)),
            }
        }
        let truncated = matching.next().is_some();
        let next_marker = truncated.then(|| items.last().map(|i| i.key.clone())).flatten();
        Ok(ListResult {
            items,
            truncated,
            next_marker,
        })
    }

    async fn bucket_status(&self, bucket: &str) -> Result<BucketStatus> {
        Ok(if bucket == "bucket" {
            BucketStatus::Mine
        } else {
            BucketStatus::DoesNotExist
        })
    }

    async fn create_bucket(&self, _bucket: &str, _location: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn delete_bucket(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo> {
        Self::check_bucket(path)?;
        let objects = self.objects.lock().unwrap();
        let (data, ct) = objects
            .get(&path.key)
            .ok_or_else(|| Error::NotFound(path.to_full_path()))?;
        Ok(Self::info(&path.key, data, ct))
    }

    async fn get_object(&self, path: &RemotePath, _options: GetOptions) -> Result<ObjectData> {
        let info = self.head_object(path).await?;
        let data = self.content(&path.key).unwrap_or_default();
        Ok(ObjectData {
            info,
            reader: Box::new(std::io::Cursor::new(data)),
        })
    }

    async fn put_object(&self, path: &RemotePath, source: ObjectSource, options: PutOptions) -> Result<ObjectInfo> {
        Self::check_bucket(path)?;
        let data = match source {
            ObjectSource::Bytes(data) => data,
            ObjectSource::File(file) => tokio::fs::read(file).await?,
            ObjectSource::Reader { mut reader, .. } => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                data
            }
        };
        if let Some(progress) = &options.progress {
            progress(data.len() as u64);
        }
        let info = Self::info(&path.key, &data, &options.content_type);
        self.objects
            .lock()
            .unwrap()
            .insert(path.key.clone(), (data, options.content_type));
        Ok(info)
    }

    async fn delete_object(&self, path: &RemotePath) -> Result<()> {
        Self::check_bucket(path)?;
        // Deleting a missing key succeeds, as it does on the services
        self.objects.lock().unwrap().remove(&path.key);
        Ok(())
    }

    async fn copy_object(&self, src: &RemotePath, dst: &RemotePath) -> Result<ObjectInfo> {
        Self::check_bucket(dst)?;
        let entry = self
            .objects
            .lock()
            .unwrap()
            .get(&src.key)
            .cloned()
            .ok_or_else(|| Error::NotFound(src.to_full_path()))?;
        let info = Self::info(&dst.key, &entry.0, &entry.1);
        self.objects.lock().unwrap().insert(dst.key.clone(), entry);
        Ok(info)
    }
}
