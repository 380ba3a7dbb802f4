//! Caruso - Course Video Pipeline
//!
//! Turns uploaded course videos into encrypted adaptive-bitrate HLS assets
//! and gates playback behind short-lived, IP-bound access tokens.
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (videos, renditions, jobs, playlists, tokens)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (Redis, S3, local)
//! - application/: Services (transcoding engine, worker orchestrator, access tokens)
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use application::engine::{FfmpegEngine, FfmpegRunner, TranscodingEngine};
pub use application::orchestrator::WorkerService;
pub use application::tokens::AccessTokenService;
pub use config::Config;
