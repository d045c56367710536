use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Object descriptor / 对象信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Leaf name (after the last `/`) / 对象名
    pub name: String,
    pub size: u64,
    /// Last modification time, when the backend reports one / 修改时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// Object storage interface / 对象存储接口
///
/// Names are object keys; one leading `/` is ignored, so `"/a/b"` and `"a/b"`
/// address the same object.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Storage name (the bucket) / 存储名称
    fn name(&self) -> &str;

    /// Key the backend sees for `name` / 完整对象键
    fn full_path(&self, name: &str) -> String;

    /// Read the whole object / 读取整个对象
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Read `length` bytes from `offset`; `-1` reads to the end / 范围读取
    async fn read_range(&self, name: &str, offset: u64, length: i64) -> Result<Vec<u8>>;

    /// Missing objects are `Ok(false)`, never an error / 对象是否存在
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Single-shot upload / 上传对象
    async fn write(&self, name: &str, data: &[u8]) -> Result<()>;

    async fn stat(&self, name: &str) -> Result<ObjectInfo>;

    /// Objects directly under `prefix` (non-recursive) / 列出对象
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Delete an object / 删除对象
    async fn remove(&self, name: &str) -> Result<()>;
}
