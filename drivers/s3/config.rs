//! S3驱动配置
//!
//! Configuration is read from YAML (JSON works too) on top of
//! [`S3Config::default`]; unknown fields are rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::go_duration;
use super::backend::ObjectApi;
use super::sse::{SSE_C, SSE_KMS};

/// Default multipart threshold (64MB) / 默认分片大小
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// S3配置
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// S3端点地址 (host[:port], scheme optional)
    pub endpoint: String,
    /// 区域
    pub region: String,
    /// 使用 AWS SDK 默认凭证链
    pub aws_sdk_auth: bool,
    pub access_key: String,
    pub secret_key: String,
    /// 使用 http 而非 https
    pub insecure: bool,
    /// 强制使用旧版签名 V2
    #[serde(rename = "signature_version2")]
    pub signature_v2: bool,
    /// 每次上传附带的用户元数据
    pub put_user_metadata: BTreeMap<String, String>,
    pub http_config: HttpConfig,
    #[serde(rename = "trace")]
    pub trace_config: TraceConfig,
    /// "" | "v1" | "v2"
    pub list_objects_version: String,
    /// Multipart threshold; advisory only, uploads are single-shot.
    pub part_size: u64,
    pub sse_config: SseConfig,
    /// 自定义实例元数据 / STS 端点
    pub sts_endpoint: String,
}

/// 服务端加密配置
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SseConfig {
    /// "" | "SSE-S3" | "SSE-KMS" | "SSE-C"
    #[serde(rename = "type")]
    pub sse_type: String,
    pub kms_key_id: String,
    /// See https://docs.aws.amazon.com/kms/latest/developerguide/services-s3.html#s3-encryption-context
    pub kms_encryption_context: Option<BTreeMap<String, String>>,
    /// Path of the file holding the SSE-C key
    pub encryption_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    pub enable: bool,
}

/// HTTP连接配置
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(with = "go_duration")]
    pub idle_conn_timeout: Duration,
    #[serde(with = "go_duration")]
    pub response_header_timeout: Duration,
    pub insecure_skip_verify: bool,
    #[serde(with = "go_duration")]
    pub tls_handshake_timeout: Duration,
    #[serde(with = "go_duration")]
    pub expect_continue_timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    /// 0 means unlimited
    pub max_conns_per_host: usize,
    /// Prebuilt object-store transport supplied by the embedding program.
    /// When set, the transport builder is bypassed and this is used as-is.
    #[serde(skip)]
    pub transport: Option<Arc<dyn ObjectApi>>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            idle_conn_timeout: Duration::from_secs(90),
            response_header_timeout: Duration::from_secs(2 * 60),
            insecure_skip_verify: false,
            tls_handshake_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
            max_idle_conns: 100,
            max_idle_conns_per_host: 100,
            max_conns_per_host: 0,
            transport: None,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: String::new(),
            region: String::new(),
            aws_sdk_auth: false,
            access_key: String::new(),
            secret_key: String::new(),
            insecure: false,
            signature_v2: false,
            put_user_metadata: BTreeMap::new(),
            http_config: HttpConfig::default(),
            trace_config: TraceConfig::default(),
            list_objects_version: String::new(),
            part_size: DEFAULT_PART_SIZE,
            sse_config: SseConfig::default(),
            sts_endpoint: String::new(),
        }
    }
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("idle_conn_timeout", &self.idle_conn_timeout)
            .field("response_header_timeout", &self.response_header_timeout)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .field("expect_continue_timeout", &self.expect_continue_timeout)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_idle_conns_per_host", &self.max_idle_conns_per_host)
            .field("max_conns_per_host", &self.max_conns_per_host)
            .field("transport", &self.transport.as_ref().map(|_| "<injected>"))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

// Secrets never reach the logs.
impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("aws_sdk_auth", &self.aws_sdk_auth)
            .field("access_key", &self.access_key)
            .field("secret_key", &redact(&self.secret_key))
            .field("insecure", &self.insecure)
            .field("signature_v2", &self.signature_v2)
            .field("put_user_metadata", &self.put_user_metadata)
            .field("http_config", &self.http_config)
            .field("trace_config", &self.trace_config)
            .field("list_objects_version", &self.list_objects_version)
            .field("part_size", &self.part_size)
            .field("sse_config", &self.sse_config)
            .field("sts_endpoint", &self.sts_endpoint)
            .finish()
    }
}

impl fmt::Debug for SseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConfig")
            .field("type", &self.sse_type)
            .field("kms_key_id", &self.kms_key_id)
            .field("kms_encryption_context", &self.kms_encryption_context)
            .field("encryption_key", &self.encryption_key)
            .finish()
    }
}

/// Listing protocol, fixed for the lifetime of a client / 列举协议版本
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListObjectsVersion {
    V1,
    #[default]
    V2,
}

impl ListObjectsVersion {
    /// "" selects the default (v2).
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "v2" => Ok(Self::V2),
            "v1" => Ok(Self::V1),
            other => Err(Error::Config(format!(
                "unsupported list objects version {:?} was provided; supported values are v1, v2",
                other
            ))),
        }
    }
}

impl S3Config {
    /// Deserialize onto a default-populated config (strict mode) / 解析配置
    pub fn parse(conf: &[u8]) -> Result<Self> {
        if conf.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(conf).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check option combinations; reports the first violation / 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::Config("no s3 endpoint in config file".into()));
        }
        if self.aws_sdk_auth && !self.access_key.is_empty() {
            return Err(Error::Config(
                "aws_sdk_auth and access_key are mutually exclusive configurations".into(),
            ));
        }
        if self.access_key.is_empty() && !self.secret_key.is_empty() {
            return Err(Error::Config(
                "no s3 access_key specified while secret_key is present in config file; \
                 either both should be present in config or envvars/IAM should be used"
                    .into(),
            ));
        }
        if !self.access_key.is_empty() && self.secret_key.is_empty() {
            return Err(Error::Config(
                "no s3 secret_key specified while access_key is present in config file; \
                 either both should be present in config or envvars/IAM should be used"
                    .into(),
            ));
        }
        if self.sse_config.sse_type == SSE_C && self.sse_config.encryption_key.is_empty() {
            return Err(Error::Config(
                "encryption_key must be set if sse_config.type is set to 'SSE-C'".into(),
            ));
        }
        if self.sse_config.sse_type == SSE_KMS && self.sse_config.kms_key_id.is_empty() {
            return Err(Error::Config(
                "kms_key_id must be set if sse_config.type is set to 'SSE-KMS'".into(),
            ));
        }
        ListObjectsVersion::parse(&self.list_objects_version)?;
        Ok(())
    }

    pub fn list_version(&self) -> Result<ListObjectsVersion> {
        ListObjectsVersion::parse(&self.list_objects_version)
    }
}
