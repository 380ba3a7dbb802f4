//! Transcoding Worker Binary
//!
//! Runs the three job lanes (transcode, thumbnail, metadata) against Redis
//! and S3, and sweeps expired playback tokens once an hour.
//!
//! Environment Variables:
//! - REDIS_URL: Redis connection URL
//! - S3_BUCKET: S3 bucket for sources and HLS outputs
//! - PUBLIC_BASE_URL: CDN base fronting the bucket
//! - KEY_DELIVERY_URL: base of the segment-key endpoint
//! - TOKEN_SECRET: HMAC secret for playback credentials

use std::sync::Arc;
use std::time::Duration;

use caruso::adapters::aws::s3::S3Store;
use caruso::adapters::redis::RedisPool;
use caruso::application::engine::{FfmpegEngine, FfmpegRunner};
use caruso::application::orchestrator::WorkerService;
use caruso::config::Config;
use caruso::domain::jobs::JobLane;
use caruso::ports::repository::TokenRepository;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let pool = RedisPool::new(&config.redis_url).expect("failed to create redis pool");

    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let storage = S3Store::new(
        aws_sdk_s3::Client::new(&aws),
        config.s3_bucket.clone(),
        config.public_base_url.clone(),
    );

    let engine = FfmpegEngine::new(
        FfmpegRunner,
        storage.clone(),
        config.key_delivery_url.clone(),
    );
    let worker = Arc::new(WorkerService::new(
        storage,
        pool.clone(),
        pool.clone(),
        engine,
        config.thumbnail_interval_secs,
        config.worker_poll_secs,
    ));

    // Hourly hygiene sweep; expired rows already fail validation.
    let sweep_pool = pool.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match TokenRepository::delete_expired(&sweep_pool, chrono::Utc::now()).await {
                Ok(swept) if swept > 0 => {
                    tracing::info!(swept, "expired playback tokens removed")
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "token sweep failed"),
            }
        }
    });

    println!("Worker started, polling for jobs...");

    let mut handles = Vec::new();
    for lane in [JobLane::Transcode, JobLane::Thumbnail, JobLane::Metadata] {
        let worker = worker.clone();
        handles.push(tokio::spawn(async move { worker.run_lane(lane).await }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}
