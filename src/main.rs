use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3_storage::{S3Storage, Storage};

/// Command-line access to an S3-compatible bucket / S3 命令行工具
#[derive(Parser)]
#[command(
    name = "s3-storage",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIME"), ")"),
    about = "Read, write and list objects in an S3-compatible bucket"
)]
struct Cli {
    /// YAML or JSON bucket config / 配置文件
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List objects directly under a prefix / 列出对象
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Print an object to stdout / 输出对象内容
    Cat { name: String },
    /// Print a byte range of an object / 范围读取
    Get {
        name: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// -1 reads to the end
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        length: i64,
    },
    /// Upload a local file / 上传文件
    Put { name: String, file: PathBuf },
    /// Show object size and modification time / 对象信息
    Stat { name: String },
    /// Print true or false / 是否存在
    Exists { name: String },
    /// Delete an object / 删除对象
    Rm { name: String },
}

async fn write_stdout(data: &[u8]) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(data).await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (stderr keeps stdout clean for object data) / 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "s3_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let conf = tokio::fs::read(&cli.config)
        .await
        .with_context(|| format!("read config {}", cli.config.display()))?;
    let storage = S3Storage::new(&conf)?;

    match cli.command {
        Command::Ls { prefix } => {
            let mut listing = storage.list_objects(&prefix);
            while let Some(item) = listing.next().await {
                let info = item?;
                let modified = info
                    .modified
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:>12}  {}  {}", info.size, modified, info.name);
            }
        }
        Command::Cat { name } => {
            let data = storage.read(&name).await?;
            write_stdout(&data).await?;
        }
        Command::Get { name, offset, length } => {
            let data = storage.read_range(&name, offset, length).await?;
            write_stdout(&data).await?;
        }
        Command::Put { name, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            storage.write(&name, &data).await?;
            tracing::info!("Uploaded {} ({} bytes)", storage.full_path(&name), data.len());
        }
        Command::Stat { name } => {
            let info = storage.stat(&name).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Exists { name } => {
            println!("{}", storage.exists(&name).await?);
        }
        Command::Rm { name } => {
            storage.remove(&name).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_defaults() {
        let cli = Cli::try_parse_from(["s3-storage", "--config", "s3.yaml", "get", "a/b.csv"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("s3.yaml"));
        match cli.command {
            Command::Get { name, offset, length } => {
                assert_eq!(name, "a/b.csv");
                assert_eq!(offset, 0);
                assert_eq!(length, -1);
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn test_parse_range_and_ls() {
        let cli = Cli::try_parse_from([
            "s3-storage", "-c", "s3.yaml", "get", "a", "--offset", "10", "--length", "-1",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Get { offset: 10, length: -1, .. }));

        let cli = Cli::try_parse_from(["s3-storage", "-c", "s3.yaml", "ls"]).unwrap();
        assert!(matches!(cli.command, Command::Ls { prefix } if prefix.is_empty()));

        assert!(Cli::try_parse_from(["s3-storage", "ls"]).is_err());
    }
}
