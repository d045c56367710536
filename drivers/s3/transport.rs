//! HTTP transport settings / 传输层参数
//!
//! Timeout and pooling knobs derived from [`HttpConfig`]. The rust-s3 client
//! only takes `response_header_timeout` (as its whole-request timeout) and
//! `insecure_skip_verify`. The instance-metadata credential client takes
//! `tls_handshake_timeout` as its connect timeout and `response_header_timeout`
//! as its read timeout. `idle_conn_timeout`, `max_idle_conns`,
//! `max_idle_conns_per_host`, `max_conns_per_host` and `expect_continue_timeout`
//! have no counterpart in rust-s3; they are parsed but not applied, and a
//! warning is logged when they differ from the defaults. An injected transport
//! in the config skips all this.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use super::backend::{ObjectApi, RustS3Api};
use super::config::{HttpConfig, S3Config};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub idle_conn_timeout: Duration,
    /// Bound on waiting for a response after the request is written
    pub response_header_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    /// 0 means unlimited
    pub max_conns_per_host: usize,
    pub insecure_skip_verify: bool,
    /// Bodies are handed to callers as stored; content-encoding is theirs to handle.
    pub disable_compression: bool,
}

impl TransportSettings {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            idle_conn_timeout: config.idle_conn_timeout,
            response_header_timeout: config.response_header_timeout,
            tls_handshake_timeout: config.tls_handshake_timeout,
            expect_continue_timeout: config.expect_continue_timeout,
            max_idle_conns: config.max_idle_conns,
            max_idle_conns_per_host: config.max_idle_conns_per_host,
            max_conns_per_host: config.max_conns_per_host,
            insecure_skip_verify: config.insecure_skip_verify,
            disable_compression: true,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

/// Use the injected transport verbatim, or build the default one / 选择传输层
pub fn build_transport(config: &S3Config) -> Result<Arc<dyn ObjectApi>> {
    if let Some(transport) = &config.http_config.transport {
        tracing::debug!("Using injected transport for bucket {}", config.bucket);
        return Ok(transport.clone());
    }

    let settings = TransportSettings::from_config(&config.http_config);
    let defaults = TransportSettings::default();
    if settings.idle_conn_timeout != defaults.idle_conn_timeout
        || settings.max_idle_conns != defaults.max_idle_conns
        || settings.max_idle_conns_per_host != defaults.max_idle_conns_per_host
        || settings.max_conns_per_host != defaults.max_conns_per_host
        || settings.expect_continue_timeout != defaults.expect_continue_timeout
    {
        tracing::warn!(
            "Connection pool settings for bucket {} are not supported by the rust-s3 client and are ignored",
            config.bucket
        );
    }
    let api = RustS3Api::new(config, &settings)?;
    Ok(Arc::new(api))
}
