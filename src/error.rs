//! Error types / 错误类型
//!
//! Every failure surfaced by the storage layer is an [`Error`]. Not-found is a
//! distinguished, expected outcome that callers branch on; everything coming
//! back from the object store is wrapped with the operation that produced it.

use std::fmt;

/// Crate result alias / 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or contradictory configuration / 配置错误
    #[error("invalid s3 config: {0}")]
    Config(String),

    /// A credential provider failed to produce credentials / 凭证获取失败
    #[error("retrieve credentials: {0}")]
    Credential(String),

    /// Unsupported or incomplete server-side encryption settings / SSE 配置错误
    #[error("initialize s3 client SSE config: {0}")]
    Encryption(String),

    /// A per-call encryption override failed validation / 无效的 SSE 覆盖
    #[error("invalid SSE config override: {0}")]
    InvalidOverride(String),

    #[error("invalid range: offset={offset}, length={length}")]
    InvalidRange { offset: u64, length: i64 },

    /// The object does not exist / 对象不存在
    #[error("object does not exist: {0}")]
    NotFound(String),

    /// Opaque object-store failure with operation context / 后端错误
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub(crate) fn backend(context: impl Into<String>, source: BackendError) -> Self {
        Error::Backend {
            context: context.into(),
            source,
        }
    }
}

/// S3 "no such key", surfaced by stat, list and delete.
pub const CODE_NO_SUCH_KEY: &str = "NoSuchKey";
/// Surfaced only once the body of a get is first read.
pub const CODE_NOT_FOUND_OBJECT: &str = "NotFoundObject";

/// Failure reported by the object store / 对象存储返回的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// S3 error code such as `NoSuchKey`, when the server reported one
    pub code: Option<String>,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            status: None,
            message: message.into(),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// `NoSuchKey`: the key is absent (stat/list/delete paths).
    pub fn is_no_such_key(&self) -> bool {
        self.code.as_deref() == Some(CODE_NO_SUCH_KEY)
    }

    /// `NotFoundObject`: the key is absent, detected while reading a get body.
    pub fn is_object_not_found(&self) -> bool {
        self.code.as_deref() == Some(CODE_NOT_FOUND_OBJECT)
    }

    /// Either of the two not-found codes.
    pub fn is_not_found(&self) -> bool {
        self.is_no_such_key() || self.is_object_not_found()
    }

    /// Recover a backend error smuggled through an `io::Error` by a body reader.
    pub fn from_io(err: &std::io::Error) -> Option<&BackendError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<BackendError>())
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, self.status) {
            (Some(code), Some(status)) => write!(f, "{} ({}, status {})", self.message, code, status),
            (Some(code), None) => write!(f, "{} ({})", self.message, code),
            (None, Some(status)) => write!(f, "{} (status {})", self.message, status),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}
