//! 服务端加密 (SSE)
//!
//! The client's default descriptor is built once from [`SseConfig`]; a call may
//! pass its own descriptor, which is validated before it replaces the default.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::error::{Error, Result};
use super::config::SseConfig;

/// SSE-KMS method name / KMS 托管密钥
pub const SSE_KMS: &str = "SSE-KMS";
/// SSE-C method name / 客户提供密钥
pub const SSE_C: &str = "SSE-C";
/// SSE-S3 method name / S3 托管密钥
pub const SSE_S3: &str = "SSE-S3";

/// SSE-C keys are AES-256 keys.
pub const SSE_C_KEY_LEN: usize = 32;

const HEADER_SSE: &str = "x-amz-server-side-encryption";
const HEADER_KMS_KEY_ID: &str = "x-amz-server-side-encryption-aws-kms-key-id";
const HEADER_KMS_CONTEXT: &str = "x-amz-server-side-encryption-context";
const HEADER_SSEC_ALGORITHM: &str = "x-amz-server-side-encryption-customer-algorithm";
const HEADER_SSEC_KEY: &str = "x-amz-server-side-encryption-customer-key";
const HEADER_SSEC_KEY_MD5: &str = "x-amz-server-side-encryption-customer-key-MD5";

/// Server-side encryption descriptor / 加密描述
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Encryption {
    #[default]
    None,
    /// SSE-S3
    ServerManaged,
    /// SSE-KMS
    Kms {
        key_id: String,
        context: BTreeMap<String, String>,
    },
    /// SSE-C, key bytes loaded once at startup
    Customer { key: Vec<u8> },
}

impl fmt::Debug for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encryption::None => f.write_str("None"),
            Encryption::ServerManaged => f.write_str("ServerManaged"),
            Encryption::Kms { key_id, context } => f
                .debug_struct("Kms")
                .field("key_id", key_id)
                .field("context", context)
                .finish(),
            Encryption::Customer { key } => f
                .debug_struct("Customer")
                .field("key", &format_args!("<{} bytes>", key.len()))
                .finish(),
        }
    }
}

impl Encryption {
    /// Build the default descriptor from config / 根据配置构建加密描述
    pub fn from_config(config: &SseConfig) -> Result<Self> {
        match config.sse_type.as_str() {
            "" => Ok(Encryption::None),
            SSE_S3 => Ok(Encryption::ServerManaged),
            SSE_KMS => {
                if config.kms_key_id.is_empty() {
                    return Err(Error::Encryption(
                        "kms_key_id must be set if sse_config.type is set to 'SSE-KMS'".into(),
                    ));
                }
                // An absent context must still encode as `{}`: a `null` context
                // header is rejected by AWS.
                let context = config.kms_encryption_context.clone().unwrap_or_default();
                Ok(Encryption::Kms {
                    key_id: config.kms_key_id.clone(),
                    context,
                })
            }
            SSE_C => {
                if config.encryption_key.is_empty() {
                    return Err(Error::Encryption(
                        "encryption_key must be set if sse_config.type is set to 'SSE-C'".into(),
                    ));
                }
                let key = std::fs::read(&config.encryption_key).map_err(|e| {
                    Error::Encryption(format!(
                        "read SSE-C key file {}: {}",
                        config.encryption_key, e
                    ))
                })?;
                let sse = Encryption::Customer { key };
                sse.validate().map_err(Error::Encryption)?;
                Ok(sse)
            }
            other => Err(Error::Encryption(format!(
                "unsupported type {:?} was provided; supported types are {}, {}, {}",
                other, SSE_S3, SSE_KMS, SSE_C
            ))),
        }
    }

    /// Check the descriptor's own invariants / 校验
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Encryption::Kms { key_id, .. } if key_id.is_empty() => {
                Err("SSE-KMS requires a non-empty key id".to_string())
            }
            Encryption::Customer { key } if key.len() != SSE_C_KEY_LEN => Err(format!(
                "SSE-C key must be {} bytes, got {}",
                SSE_C_KEY_LEN,
                key.len()
            )),
            _ => Ok(()),
        }
    }

    /// Pick the per-call override if one is given, else the default.
    pub fn resolve<'a>(default: &'a Encryption, call: Option<&'a Encryption>) -> Result<&'a Encryption> {
        match call {
            Some(sse) => {
                sse.validate().map_err(Error::InvalidOverride)?;
                Ok(sse)
            }
            None => Ok(default),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Encryption::None)
    }

    /// Method name as written in config ("" for none).
    pub fn method(&self) -> &'static str {
        match self {
            Encryption::None => "",
            Encryption::ServerManaged => SSE_S3,
            Encryption::Kms { .. } => SSE_KMS,
            Encryption::Customer { .. } => SSE_C,
        }
    }

    /// Headers for uploads / 上传请求头
    pub fn write_headers(&self) -> Vec<(String, String)> {
        match self {
            Encryption::None => Vec::new(),
            Encryption::ServerManaged => vec![(HEADER_SSE.to_string(), "AES256".to_string())],
            Encryption::Kms { key_id, context } => {
                // BTreeMap<String, String> always serializes
                let context_json = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());
                vec![
                    (HEADER_SSE.to_string(), "aws:kms".to_string()),
                    (HEADER_KMS_KEY_ID.to_string(), key_id.clone()),
                    (HEADER_KMS_CONTEXT.to_string(), B64.encode(context_json)),
                ]
            }
            Encryption::Customer { key } => Self::customer_headers(key),
        }
    }

    /// Headers for reads: only SSE-C has to be repeated on GET / 读取请求头
    pub fn read_headers(&self) -> Vec<(String, String)> {
        match self {
            Encryption::Customer { key } => Self::customer_headers(key),
            _ => Vec::new(),
        }
    }

    fn customer_headers(key: &[u8]) -> Vec<(String, String)> {
        let digest = md5::compute(key);
        vec![
            (HEADER_SSEC_ALGORITHM.to_string(), "AES256".to_string()),
            (HEADER_SSEC_KEY.to_string(), B64.encode(key)),
            (HEADER_SSEC_KEY_MD5.to_string(), B64.encode(digest.0)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_none_and_s3() {
        assert_eq!(Encryption::from_config(&SseConfig::default()).unwrap(), Encryption::None);
        assert!(Encryption::None.write_headers().is_empty());

        let config = SseConfig { sse_type: "SSE-S3".into(), ..Default::default() };
        let sse = Encryption::from_config(&config).unwrap();
        assert_eq!(sse, Encryption::ServerManaged);
        assert_eq!(header(&sse.write_headers(), HEADER_SSE), Some("AES256"));
        assert!(sse.read_headers().is_empty());
    }

    #[test]
    fn test_kms_empty_context_is_empty_object() {
        let config = SseConfig {
            sse_type: "SSE-KMS".into(),
            kms_key_id: "alias/costs".into(),
            kms_encryption_context: None,
            ..Default::default()
        };
        let sse = Encryption::from_config(&config).unwrap();
        match &sse {
            Encryption::Kms { key_id, context } => {
                assert_eq!(key_id, "alias/costs");
                assert!(context.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let headers = sse.write_headers();
        assert_eq!(header(&headers, HEADER_SSE), Some("aws:kms"));
        assert_eq!(header(&headers, HEADER_KMS_KEY_ID), Some("alias/costs"));
        // base64("{}"), never base64("null")
        assert_eq!(header(&headers, HEADER_KMS_CONTEXT), Some("e30="));
    }

    #[test]
    fn test_kms_context_encoded() {
        let mut context = BTreeMap::new();
        context.insert("team".to_string(), "finops".to_string());
        let config = SseConfig {
            sse_type: "SSE-KMS".into(),
            kms_key_id: "k".into(),
            kms_encryption_context: Some(context),
            ..Default::default()
        };
        let headers = Encryption::from_config(&config).unwrap().write_headers();
        let encoded = header(&headers, HEADER_KMS_CONTEXT).unwrap();
        let decoded = B64.decode(encoded).unwrap();
        assert_eq!(decoded, br#"{"team":"finops"}"#);
    }

    #[test]
    fn test_customer_key_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 32]).unwrap();
        let config = SseConfig {
            sse_type: "SSE-C".into(),
            encryption_key: file.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let sse = Encryption::from_config(&config).unwrap();
        assert_eq!(sse, Encryption::Customer { key: vec![7u8; 32] });

        let headers = sse.read_headers();
        assert_eq!(header(&headers, HEADER_SSEC_ALGORITHM), Some("AES256"));
        assert_eq!(header(&headers, HEADER_SSEC_KEY), Some(B64.encode([7u8; 32]).as_str()));
        assert_eq!(
            header(&headers, HEADER_SSEC_KEY_MD5),
            Some(B64.encode(md5::compute([7u8; 32]).0).as_str())
        );
        assert_eq!(sse.write_headers(), headers);
        assert!(!format!("{:?}", sse).contains("7, 7"));
    }

    #[test]
    fn test_customer_key_errors() {
        let missing = SseConfig { sse_type: "SSE-C".into(), ..Default::default() };
        assert!(matches!(Encryption::from_config(&missing), Err(Error::Encryption(msg)) if msg.contains("encryption_key must be set")));

        let unreadable = SseConfig {
            sse_type: "SSE-C".into(),
            encryption_key: "/nonexistent/sse-c.key".into(),
            ..Default::default()
        };
        assert!(matches!(Encryption::from_config(&unreadable), Err(Error::Encryption(_))));

        let mut short = tempfile::NamedTempFile::new().unwrap();
        short.write_all(b"too short").unwrap();
        let short_key = SseConfig {
            sse_type: "SSE-C".into(),
            encryption_key: short.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        assert!(matches!(Encryption::from_config(&short_key), Err(Error::Encryption(_))));
    }

    #[test]
    fn test_unsupported_type() {
        let config = SseConfig { sse_type: "SSE-XYZ".into(), ..Default::default() };
        match Encryption::from_config(&config) {
            Err(Error::Encryption(msg)) => {
                assert!(msg.contains("SSE-XYZ"));
                assert!(msg.contains("SSE-S3, SSE-KMS, SSE-C"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_override() {
        let default = Encryption::ServerManaged;
        assert_eq!(Encryption::resolve(&default, None).unwrap(), &default);

        let call = Encryption::Kms { key_id: "tenant-a".into(), context: BTreeMap::new() };
        assert_eq!(Encryption::resolve(&default, Some(&call)).unwrap(), &call);

        let disabled = Encryption::None;
        assert_eq!(Encryption::resolve(&default, Some(&disabled)).unwrap(), &Encryption::None);

        let bad = Encryption::Customer { key: vec![1, 2, 3] };
        assert!(matches!(Encryption::resolve(&default, Some(&bad)), Err(Error::InvalidOverride(_))));

        let bad = Encryption::Kms { key_id: String::new(), context: BTreeMap::new() };
        assert!(matches!(Encryption::resolve(&default, Some(&bad)), Err(Error::InvalidOverride(_))));
    }
}
