//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 5 * 1024 * 1024;
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "application/pdf"];
pub const DEFAULT_UPLOADER: &str = "Anonymous";
pub const DEFAULT_ORPHAN_AUDIT_SECS: u64 = 15 * 60;
pub const ORPHAN_GRACE_SECS: u64 = 60;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "filebox", version, about = "filebox upload server")]
pub struct Args {
    #[arg(
        short = 'u',
        long,
        env = "FILEBOX_UPLOAD_DIR",
        default_value = ".filebox/uploads",
        help = "Directory holding uploaded blobs"
    )]
    pub upload_dir: String,
    #[arg(
        short = 'r',
        long,
        env = "FILEBOX_RECORDS_PATH",
        default_value = ".filebox/records.json",
        help = "Document file holding file records"
    )]
    pub records_path: String,
    #[arg(
        short = 'b',
        long,
        env = "FILEBOX_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FILEBOX_PORT",
        default_value_t = 8000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "FILEBOX_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload size in bytes"
    )]
    pub max_upload_size: u64,
    #[arg(long, env = "FILEBOX_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "FILEBOX_ORPHAN_AUDIT_SECS",
        default_value_t = DEFAULT_ORPHAN_AUDIT_SECS,
        help = "Orphan audit interval in seconds (0 to disable)"
    )]
    pub orphan_audit_secs: u64,
}
