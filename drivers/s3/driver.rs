//! S3存储核心实现
//!
//! - 对象名去掉开头的一个 `/` 后作为对象键
//! - 单次上传，不做分片
//! - 读取前先做一次零字节预读，以便识别不存在的对象

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::error::{BackendError, Error, Result};
use crate::storage::{ObjectInfo, Storage};
use crate::utils::{dir_prefix, trim_leading, trim_name, DIR_DELIM};
use super::backend::{ByteRange, ListRequest, ObjectApi, ObjectRequest};
use super::config::{ListObjectsVersion, S3Config};
use super::credentials::CredentialChain;
use super::sse::Encryption;
use super::transport::{build_transport, TransportSettings};

const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Wrap a backend failure, merging both not-found codes into [`Error::NotFound`].
fn classify(err: BackendError, key: &str, context: &str) -> Error {
    if err.is_not_found() {
        Error::NotFound(key.to_string())
    } else {
        Error::backend(context, err)
    }
}

/// Body read failure; the backend error travels inside the `io::Error`.
fn read_error(err: std::io::Error, key: &str, context: &str) -> Error {
    match BackendError::from_io(&err) {
        Some(inner) => classify(inner.clone(), key, context),
        None => Error::backend(context, BackendError::new(err.to_string())),
    }
}

/// S3存储
pub struct S3Storage {
    name: String,
    api: Arc<dyn ObjectApi>,
    credentials: Arc<CredentialChain>,
    sse: Encryption,
    put_user_metadata: BTreeMap<String, String>,
    part_size: u64,
    list_version: ListObjectsVersion,
}

impl S3Storage {
    /// Parse a YAML/JSON config and build the client / 从配置字节创建
    pub fn new(conf: &[u8]) -> Result<Self> {
        let config = S3Config::parse(conf)?;
        Self::with_config(config)
    }

    /// Build the client from a config record / 从配置创建
    pub fn with_config(config: S3Config) -> Result<Self> {
        config.validate()?;

        let settings = TransportSettings::from_config(&config.http_config);
        let credentials = CredentialChain::from_config(&config, &settings)?;
        let api = build_transport(&config)?;
        let sse = Encryption::from_config(&config.sse_config)?;
        let list_version = config.list_version()?;

        tracing::info!(
            "S3 storage ready: bucket={}, endpoint={}, sse={:?}, list={:?}",
            config.bucket,
            config.endpoint,
            sse.method(),
            list_version
        );

        Ok(Self {
            name: config.bucket,
            api,
            credentials: Arc::new(credentials),
            sse,
            put_user_metadata: config.put_user_metadata,
            part_size: config.part_size,
            list_version,
        })
    }

    /// Encryption applied when a call passes no override / 默认加密
    pub fn default_sse(&self) -> &Encryption {
        &self.sse
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn list_version(&self) -> ListObjectsVersion {
        self.list_version
    }

    /// Ranged read with an optional per-call encryption override / 指定加密的范围读取
    pub async fn read_range_with_sse(
        &self,
        name: &str,
        offset: u64,
        length: i64,
        sse: Option<&Encryption>,
    ) -> Result<Vec<u8>> {
        let key = trim_leading(name);
        let range = ByteRange::from_offset_length(offset, length)?;
        let sse = Encryption::resolve(&self.sse, sse)?;
        let headers = sse.read_headers();
        let credentials = self.credentials.credentials().await?;
        tracing::debug!("Reading s3://{}/{} range {:?}", self.name, key, range.header_value());

        let req = ObjectRequest {
            key,
            credentials: &credentials,
            headers: &headers,
        };
        let mut body = self
            .api
            .get_object(&req, range)
            .await
            .map_err(|e| classify(e, key, "get s3 object"))?;

        // 零字节预读：对象不存在时首次读取才会报错
        if let Err(e) = body.read(&mut []).await {
            drop(body);
            return Err(match BackendError::from_io(&e) {
                Some(inner) if inner.is_not_found() => Error::NotFound(key.to_string()),
                _ => read_error(e, key, "read from s3 failed"),
            });
        }

        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| read_error(e, key, "read s3 object"))?;
        Ok(data)
    }

    /// Upload with an optional per-call encryption override / 指定加密的上传
    pub async fn write_with_sse(&self, name: &str, data: &[u8], sse: Option<&Encryption>) -> Result<()> {
        let key = trim_leading(name);
        let sse = Encryption::resolve(&self.sse, sse)?;

        let mut headers = sse.write_headers();
        headers.extend(
            self.put_user_metadata
                .iter()
                .map(|(k, v)| (format!("{}{}", USER_METADATA_PREFIX, k), v.clone())),
        );
        if data.len() as u64 > self.part_size {
            tracing::debug!(
                "Object {} is {} bytes, above part_size {}; uploading in one request",
                key,
                data.len(),
                self.part_size
            );
        }

        let credentials = self.credentials.credentials().await?;
        tracing::info!("Writing s3://{}/{} ({} bytes)", self.name, key, data.len());
        let req = ObjectRequest {
            key,
            credentials: &credentials,
            headers: &headers,
        };
        self.api
            .put_object(&req, data)
            .await
            .map_err(|e| classify(e, key, "upload s3 object"))
    }

    /// Lazy listing of the objects directly under `prefix` / 惰性列举
    pub fn list_objects(&self, prefix: &str) -> Listing<'_> {
        Listing {
            storage: self,
            prefix: dir_prefix(trim_leading(prefix)),
            buffer: VecDeque::new(),
            token: None,
            done: false,
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_path(&self, name: &str) -> String {
        trim_leading(name).to_string()
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.read_range_with_sse(name, 0, -1, None).await
    }

    async fn read_range(&self, name: &str, offset: u64, length: i64) -> Result<Vec<u8>> {
        self.read_range_with_sse(name, offset, length, None).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self.stat(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.write_with_sse(name, data, None).await
    }

    async fn stat(&self, name: &str) -> Result<ObjectInfo> {
        let key = trim_leading(name);
        let credentials = self.credentials.credentials().await?;
        let req = ObjectRequest {
            key,
            credentials: &credentials,
            headers: &[],
        };
        let head = self
            .api
            .head_object(&req)
            .await
            .map_err(|e| classify(e, key, "stat s3 object"))?;

        Ok(ObjectInfo {
            name: trim_name(key).to_string(),
            size: head.size,
            modified: head.last_modified,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.list_objects(prefix).collect().await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let key = trim_leading(name);
        let credentials = self.credentials.credentials().await?;
        tracing::info!("Removing s3://{}/{}", self.name, key);
        let req = ObjectRequest {
            key,
            credentials: &credentials,
            headers: &[],
        };
        self.api
            .delete_object(&req)
            .await
            .map_err(|e| classify(e, key, "remove s3 object"))
    }
}

/// Pull-based listing; stops for good after the last page or the first error.
/// 列举迭代器
pub struct Listing<'a> {
    storage: &'a S3Storage,
    prefix: String,
    buffer: VecDeque<ObjectInfo>,
    token: Option<String>,
    done: bool,
}

impl Listing<'_> {
    /// The canonical prefix being listed
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next object, fetching another page when needed / 下一个对象
    pub async fn next(&mut self) -> Option<Result<ObjectInfo>> {
        loop {
            if let Some(info) = self.buffer.pop_front() {
                return Some(Ok(info));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page().await {
                self.done = true;
                return Some(Err(e));
            }
        }
    }

    /// Drain into a Vec, failing on the first error / 全部收集
    pub async fn collect(mut self) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        while let Some(item) = self.next().await {
            objects.push(item?);
        }
        Ok(objects)
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let storage = self.storage;
        let credentials = storage.credentials.credentials().await?;
        let delimiter = DIR_DELIM.to_string();
        let req = ListRequest {
            prefix: &self.prefix,
            delimiter: Some(&delimiter),
            token: self.token.as_deref(),
            credentials: &credentials,
        };
        let page = storage
            .api
            .list_page(&req)
            .await
            .map_err(|e| classify(e, &self.prefix, "list s3 objects"))?;
        tracing::debug!(
            "Listed page of s3://{}/{}: {} objects, more={}",
            storage.name,
            self.prefix,
            page.objects.len(),
            page.next_token.is_some()
        );

        for object in page.objects {
            // 跳过目录占位对象
            if object.key.is_empty() || object.key == self.prefix {
                continue;
            }
            self.buffer.push_back(ObjectInfo {
                name: trim_name(&object.key).to_string(),
                size: object.size,
                modified: object.last_modified,
            });
        }

        match page.next_token {
            Some(token) => self.token = Some(token),
            None => self.done = true,
        }
        Ok(())
    }
}
