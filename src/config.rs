//! Environment configuration.

use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    /// Redis connection URL (queue + repositories)
    pub redis_url: String,
    /// S3 bucket for sources and HLS outputs
    pub s3_bucket: String,
    /// CDN base fronting the bucket; public URLs are derived from it
    pub public_base_url: String,
    /// Base of the key-delivery endpoint written into encrypted playlists
    pub key_delivery_url: String,
    /// HMAC secret for signed playback credentials
    pub token_secret: String,
    /// Playback token lifetime in seconds
    pub token_ttl_secs: i64,
    /// Seconds between extracted thumbnails
    pub thumbnail_interval_secs: u32,
    /// Queue long-poll timeout per lane iteration
    pub worker_poll_secs: f64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics if required variables are not set.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| String::from("redis://127.0.0.1/")),
            s3_bucket: env::var("S3_BUCKET").expect("S3_BUCKET env var required"),
            public_base_url: env::var("PUBLIC_BASE_URL").expect("PUBLIC_BASE_URL env var required"),
            key_delivery_url: env::var("KEY_DELIVERY_URL")
                .expect("KEY_DELIVERY_URL env var required"),
            token_secret: env::var("TOKEN_SECRET").expect("TOKEN_SECRET env var required"),
            token_ttl_secs: env::var("TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7200),
            thumbnail_interval_secs: env::var("THUMBNAIL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            worker_poll_secs: env::var("WORKER_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5.0),
        }
    }
}
