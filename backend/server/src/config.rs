use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use tracing::{info, warn};

pub const JWT_SECRET: &str = "JWT_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub frontend_origin: String,
    pub max_image_bytes: usize,
    pub jwt_secret: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            store_backend: try_load("STORE_BACKEND", "redis"),
            redis_url: try_load("REDIS_URL", "redis://redis:6379"),
            upload_dir: try_load("UPLOAD_DIR", "./uploads"),
            public_url: try_load::<String>("PUBLIC_URL", "http://localhost:1111")
                .trim_end_matches('/')
                .to_string(),
            frontend_origin: try_load("FRONTEND_ORIGIN", "http://localhost:3000"),
            max_image_bytes: try_load("MAX_IMAGE_BYTES", "5242880"),
            jwt_secret: read_secret(JWT_SECRET),
        }
    }

    /// Whole-request cap for multipart uploads: every image slot full plus room for text fields.
    pub fn max_body_bytes(&self) -> usize {
        self.max_image_bytes * crate::models::MAX_SUBMISSION_IMAGES + 64 * 1024
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}, trying environment");
            var(secret_name)
        })
        .ok()
        .filter(|secret| !secret.is_empty())
        .expect("Secrets misconfigured!")
}
