//! S3兼容对象存储
//!
//! 支持：
//! - 静态密钥 / 环境变量 / 凭证文件 / 实例元数据 / AWS SDK 凭证链
//! - SSE-S3、SSE-KMS、SSE-C 服务端加密，可按调用覆盖
//! - ListObjects v1 / v2 分页
//!
//! 设计原则：
//! - 只提供原语（read, write, stat, list, remove）
//! - 不做内部重试，由调用方决定

pub mod backend;
pub mod config;
pub mod credentials;
mod driver;
pub mod sse;
pub mod transport;

pub use backend::{ByteRange, ObjectApi, RustS3Api};
pub use config::{HttpConfig, ListObjectsVersion, S3Config, SseConfig, TraceConfig};
pub use credentials::{CredentialChain, CredentialProvider, Credentials, SignatureVersion};
pub use driver::{Listing, S3Storage};
pub use sse::Encryption;
