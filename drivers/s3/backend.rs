//! 对象存储传输层
//!
//! [`ObjectApi`] is the seam between the storage façade and the wire. The
//! default implementation drives `rust-s3`; embedding programs (and tests)
//! can inject their own through `http_config.transport`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use s3::bucket::Bucket;
use s3::error::S3Error;
use s3::Region;
use serde::Deserialize;
use tokio::io::AsyncRead;

use crate::error::{BackendError, Error, Result, CODE_NO_SUCH_KEY};
use super::config::{ListObjectsVersion, S3Config};
use super::credentials::Credentials;
use super::transport::TransportSettings;

/// Object body; nothing is guaranteed to have been fetched until the first read.
pub type ObjectBody = Box<dyn AsyncRead + Unpin + Send>;

/// Byte window of a ranged get / 读取范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Whole object
    Full,
    /// From offset to end of object
    From(u64),
    /// Inclusive on both ends
    Closed { start: u64, end: u64 },
}

impl ByteRange {
    /// Map (offset, length) onto a byte window; length -1 reads to the end.
    /// 将 (offset, length) 转换为读取范围
    pub fn from_offset_length(offset: u64, length: i64) -> Result<Self> {
        let invalid = || Error::InvalidRange { offset, length };
        match length {
            -1 if offset == 0 => Ok(ByteRange::Full),
            -1 => Ok(ByteRange::From(offset)),
            n if n <= 0 => Err(invalid()),
            n => {
                let end = offset
                    .checked_add(n as u64 - 1)
                    .ok_or_else(invalid)?;
                Ok(ByteRange::Closed { start: offset, end })
            }
        }
    }

    /// HTTP `Range` header value, `None` for the whole object.
    pub fn header_value(&self) -> Option<String> {
        match self {
            ByteRange::Full => None,
            ByteRange::From(start) => Some(format!("bytes={}-", start)),
            ByteRange::Closed { start, end } => Some(format!("bytes={}-{}", start, end)),
        }
    }
}

/// Single-object request / 单对象请求
#[derive(Debug, Clone, Copy)]
pub struct ObjectRequest<'a> {
    pub key: &'a str,
    pub credentials: &'a Credentials,
    /// Extra request headers (encryption, user metadata)
    pub headers: &'a [(String, String)],
}

/// One listing call / 列举请求
#[derive(Debug, Clone, Copy)]
pub struct ListRequest<'a> {
    pub prefix: &'a str,
    pub delimiter: Option<&'a str>,
    /// Continuation token from the previous page
    pub token: Option<&'a str>,
    pub credentials: &'a Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing / 列举结果页
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    pub common_prefixes: Vec<String>,
    /// `None` on the last page
    pub next_token: Option<String>,
}

/// Object store operations used by the storage façade / 对象存储接口
#[async_trait]
pub trait ObjectApi: Send + Sync {
    async fn get_object(&self, req: &ObjectRequest<'_>, range: ByteRange) -> std::result::Result<ObjectBody, BackendError>;

    async fn head_object(&self, req: &ObjectRequest<'_>) -> std::result::Result<ObjectHead, BackendError>;

    async fn put_object(&self, req: &ObjectRequest<'_>, data: &[u8]) -> std::result::Result<(), BackendError>;

    async fn delete_object(&self, req: &ObjectRequest<'_>) -> std::result::Result<(), BackendError>;

    async fn list_page(&self, req: &ListRequest<'_>) -> std::result::Result<ListPage, BackendError>;
}

/// `<Error><Code>..</Code><Message>..</Message></Error>` response body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Turn a non-success response into a [`BackendError`].
fn response_error(status: u16, body: &[u8]) -> BackendError {
    let text = String::from_utf8_lossy(body);
    let parsed: ErrorBody = quick_xml::de::from_str(&text).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| format!("unexpected response status {}", status));
    let code = parsed.code.or_else(|| (status == 404).then(|| CODE_NO_SUCH_KEY.to_string()));
    BackendError {
        code,
        status: Some(status),
        message,
    }
}

fn s3_error(err: S3Error) -> BackendError {
    match err {
        S3Error::HttpFailWithBody(status, body) => response_error(status, body.as_bytes()),
        other => BackendError::new(other.to_string()),
    }
}

/// List failures. Without `fail-on-err` rust-s3 parses any body as a listing
/// before returning the status, so an S3 error document surfaces as a decode
/// error with the status already dropped.
fn list_error(err: S3Error) -> BackendError {
    match err {
        S3Error::SerdeXml(e) => BackendError::new(format!("list response is not a bucket listing: {}", e)),
        other => s3_error(other),
    }
}

/// v1 resume marker when a truncated page omits NextMarker (servers only send
/// it with a delimiter): the greatest key or common prefix on the page.
fn fallback_marker(objects: &[ListedObject], common_prefixes: &[String]) -> Option<String> {
    let last_key = objects.last().map(|o| o.key.as_str());
    let last_prefix = common_prefixes.last().map(String::as_str);
    last_key.max(last_prefix).map(str::to_string)
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

fn parse_rfc2822(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value).ok().map(|t| t.with_timezone(&Utc))
}

/// Endpoint URL with scheme; a scheme already present is kept.
fn endpoint_url(endpoint: &str, insecure: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.trim_end_matches('/').to_string();
    }
    let scheme = if insecure { "http" } else { "https" };
    format!("{}://{}", scheme, endpoint.trim_end_matches('/'))
}

/// AWS endpoints support virtual-hosted style; everything else gets path style.
fn use_path_style(endpoint: &str) -> bool {
    let host = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    !host.ends_with("amazonaws.com")
}

/// Default transport over `rust-s3` / 基于 rust-s3 的传输层
pub struct RustS3Api {
    bucket_name: String,
    region: Region,
    path_style: bool,
    list_version: ListObjectsVersion,
    request_timeout: Duration,
    insecure_skip_verify: bool,
    trace: bool,
    /// Bucket handle for the last credentials seen
    cached: Mutex<Option<(Credentials, Bucket)>>,
}

impl RustS3Api {
    pub fn new(config: &S3Config, settings: &TransportSettings) -> Result<Self> {
        if config.signature_v2 {
            tracing::warn!(
                "signature_version2 requested for bucket {}; requests are signed with V4",
                config.bucket
            );
        }
        let endpoint = endpoint_url(&config.endpoint, config.insecure);
        Ok(Self {
            bucket_name: config.bucket.clone(),
            region: Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            path_style: use_path_style(&endpoint),
            list_version: config.list_version()?,
            request_timeout: settings.response_header_timeout,
            insecure_skip_verify: settings.insecure_skip_verify,
            trace: config.trace_config.enable,
            cached: Mutex::new(None),
        })
    }

    fn create_bucket(&self, credentials: &Credentials) -> std::result::Result<Bucket, BackendError> {
        let creds = if credentials.is_anonymous() {
            s3::creds::Credentials::anonymous()
        } else {
            s3::creds::Credentials::new(
                Some(&credentials.access_key_id),
                Some(&credentials.secret_access_key),
                credentials.session_token.as_deref(),
                None,
                None,
            )
        }
        .map_err(|e| BackendError::new(format!("create s3 credentials: {}", e)))?;

        // with_request_timeout rebuilds the reqwest client from fresh options,
        // so TLS relaxation has to come after it
        let mut bucket_box = Bucket::new(&self.bucket_name, self.region.clone(), creds)
            .map_err(s3_error)?
            .with_request_timeout(self.request_timeout)
            .map_err(s3_error)?;
        if self.path_style {
            bucket_box = bucket_box.with_path_style();
        }

        let mut bucket: Bucket = if self.insecure_skip_verify {
            bucket_box.set_dangerous_config(true, true).map_err(s3_error)?
        } else {
            *bucket_box
        };
        if self.list_version == ListObjectsVersion::V1 {
            bucket.set_listobjects_v1();
        }
        Ok(bucket)
    }

    /// Bucket handle for these credentials carrying the given headers.
    fn bucket(&self, credentials: &Credentials, headers: &[(String, String)]) -> std::result::Result<Bucket, BackendError> {
        let mut bucket = {
            let mut cached = self.cached.lock();
            match cached.as_ref() {
                Some((creds, bucket)) if creds == credentials => bucket.clone(),
                _ => {
                    let bucket = self.create_bucket(credentials)?;
                    *cached = Some((credentials.clone(), bucket.clone()));
                    bucket
                }
            }
        };
        for (name, value) in headers {
            bucket.add_header(name, value);
        }
        Ok(bucket)
    }

    fn trace(&self, op: &str, key: &str) {
        if self.trace {
            tracing::info!("s3 {} {}/{}", op, self.bucket_name, key);
        }
    }
}

#[async_trait]
impl ObjectApi for RustS3Api {
    async fn get_object(&self, req: &ObjectRequest<'_>, range: ByteRange) -> std::result::Result<ObjectBody, BackendError> {
        self.trace("GET", req.key);
        let bucket = self.bucket(req.credentials, req.headers)?;
        let response = match range {
            ByteRange::Full => bucket.get_object(req.key).await,
            ByteRange::From(start) => bucket.get_object_range(req.key, start, None).await,
            ByteRange::Closed { start, end } => bucket.get_object_range(req.key, start, Some(end)).await,
        }
        .map_err(s3_error)?;

        if !is_success(response.status_code()) {
            return Err(response_error(response.status_code(), response.bytes()));
        }
        // rust-s3返回完整响应，封装为AsyncRead
        let data = response.bytes().to_vec();
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn head_object(&self, req: &ObjectRequest<'_>) -> std::result::Result<ObjectHead, BackendError> {
        self.trace("HEAD", req.key);
        let bucket = self.bucket(req.credentials, req.headers)?;
        let (head, status) = bucket.head_object(req.key).await.map_err(s3_error)?;
        if !is_success(status) {
            // HEAD responses carry no body
            return Err(response_error(status, &[]));
        }
        Ok(ObjectHead {
            size: head.content_length.unwrap_or(0).max(0) as u64,
            last_modified: head.last_modified.as_deref().and_then(parse_rfc2822),
        })
    }

    async fn put_object(&self, req: &ObjectRequest<'_>, data: &[u8]) -> std::result::Result<(), BackendError> {
        self.trace("PUT", req.key);
        let bucket = self.bucket(req.credentials, req.headers)?;
        let response = bucket.put_object(req.key, data).await.map_err(s3_error)?;
        if !is_success(response.status_code()) {
            return Err(response_error(response.status_code(), response.bytes()));
        }
        Ok(())
    }

    async fn delete_object(&self, req: &ObjectRequest<'_>) -> std::result::Result<(), BackendError> {
        self.trace("DELETE", req.key);
        let bucket = self.bucket(req.credentials, req.headers)?;
        let response = bucket.delete_object(req.key).await.map_err(s3_error)?;
        if !is_success(response.status_code()) {
            return Err(response_error(response.status_code(), response.bytes()));
        }
        Ok(())
    }

    async fn list_page(&self, req: &ListRequest<'_>) -> std::result::Result<ListPage, BackendError> {
        self.trace("LIST", req.prefix);
        let bucket = self.bucket(req.credentials, &[])?;
        let (result, status) = bucket
            .list_page(
                req.prefix.to_string(),
                req.delimiter.map(str::to_string),
                req.token.map(str::to_string),
                None,
                None,
            )
            .await
            .map_err(list_error)?;
        if !is_success(status) {
            return Err(response_error(status, &[]));
        }

        let objects: Vec<ListedObject> = result
            .contents
            .iter()
            .map(|obj| ListedObject {
                key: obj.key.clone(),
                size: obj.size as u64,
                last_modified: parse_rfc3339(&obj.last_modified),
            })
            .collect();
        let common_prefixes: Vec<String> = result
            .common_prefixes
            .unwrap_or_default()
            .into_iter()
            .map(|cp| cp.prefix)
            .collect();

        let next_token = if !result.is_truncated {
            None
        } else {
            match self.list_version {
                // rust-s3 reads NextMarker into the continuation token field
                ListObjectsVersion::V1 => result
                    .next_continuation_token
                    .or_else(|| fallback_marker(&objects, &common_prefixes)),
                ListObjectsVersion::V2 => result.next_continuation_token,
            }
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }
}
