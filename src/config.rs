//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::build;
use crate::naming::NamingPolicy;
use crate::upload::UploadConfig;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_PARTIAL_TTL_SECS: u64 = 24 * 60 * 60;
pub const PARTIAL_CLEAN_INTERVAL_SECS: u64 = 900;
pub const MEMORY_WATCH_INTERVAL_SECS: u64 = 1;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "upserve",
    version = VERSION_INFO,
    about = "Serve a directory over HTTP with browsing and uploads"
)]
pub struct Args {
    #[arg(
        env = "UPSERVE_ROOT",
        help = "Directory to serve (defaults to the current directory)"
    )]
    pub path: Option<PathBuf>,
    #[arg(
        short = 'b',
        long = "bind",
        env = "UPSERVE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "UPSERVE_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Port to use"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "UPSERVE_KEEP_UPLOAD_FILENAME",
        help = "Keep original upload file name: use 'filename.ext' instead of 'filename-<random>.ext'"
    )]
    pub keep_upload_filename: bool,
    #[arg(long, env = "UPSERVE_DEV", help = "Use development settings (trace logging)")]
    pub dev: bool,
    #[arg(long, env = "UPSERVE_WATCH_MEM", help = "Log memory usage every second")]
    pub watch_mem: bool,
    #[arg(
        long,
        env = "UPSERVE_UPLOAD_MAX_SIZE",
        default_value_t = 0,
        help = "Max upload size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "UPSERVE_PARTIAL_TTL_SECS",
        default_value_t = DEFAULT_PARTIAL_TTL_SECS,
        help = "Remove abandoned partial uploads older than this many seconds (0 to disable)"
    )]
    pub partial_ttl_secs: u64,
    #[arg(long, env = "UPSERVE_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}

/// 运行时配置：由命令行参数校验后得到。
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub serving_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub keep_original_name: bool,
    pub dev_mode: bool,
    pub watch_mem: bool,
    pub upload_max_size: u64,
    pub partial_ttl: Duration,
    pub cors_origins: Option<String>,
}

impl ServerConfig {
    /// 校验服务根目录（必须存在且为目录）并转换为规范化的绝对路径。
    pub fn from_args(args: Args) -> io::Result<Self> {
        let root = match args.path {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        let serving_root = std::fs::canonicalize(&root).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("serving root {}: {err}", root.display()),
            )
        })?;
        if !serving_root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("serving root {} is not a directory", serving_root.display()),
            ));
        }

        Ok(Self {
            serving_root,
            host: args.host,
            port: args.port,
            keep_original_name: args.keep_upload_filename,
            dev_mode: args.dev,
            watch_mem: args.watch_mem,
            upload_max_size: args.upload_max_size,
            partial_ttl: Duration::from_secs(args.partial_ttl_secs),
            cors_origins: args.cors_origins,
        })
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            naming: NamingPolicy {
                keep_original: self.keep_original_name,
            },
            max_size: self.upload_max_size,
            partial_ttl: self.partial_ttl,
        }
    }
}
