//! Transcoding engine: drives ffmpeg/ffprobe to turn one source file into an
//! HLS rendition ladder, thumbnails and probe metadata.
//!
//! Every intermediate lives under the caller's scratch directory, which is
//! removed whichever way the job ends.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::hls::MasterPlaylist;
use crate::domain::keys;
use crate::domain::quality::{select_ladder, Quality};
use crate::domain::video::{EncryptionKey, Thumbnail};
use crate::error::TranscodeError;
use crate::ports::storage::ObjectStorePort;

/// Fixed HLS segment length in seconds.
pub const SEGMENT_SECONDS: u32 = 6;

/// Output width of extracted thumbnails.
const THUMB_WIDTH: u32 = 320;

/// Command seam around the ffmpeg tooling, so engine logic is testable
/// without media files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaRunner: Send + Sync {
    async fn run_ffprobe(&self, input: &Path) -> io::Result<Output>;
    async fn run_ffmpeg(&self, args: &[String]) -> io::Result<Output>;
}

/// Real runner shelling out to the ffmpeg CLI tools.
#[derive(Clone, Copy)]
pub struct FfmpegRunner;

#[async_trait]
impl MediaRunner for FfmpegRunner {
    async fn run_ffprobe(&self, input: &Path) -> io::Result<Output> {
        TokioCommand::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-print_format")
            .arg("json")
            .arg(input)
            .output()
            .await
    }

    async fn run_ffmpeg(&self, args: &[String]) -> io::Result<Output> {
        TokioCommand::new("ffmpeg").args(args).output().await
    }
}

/// Everything the pipeline needs to know about a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProbe {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub frame_rate: f64,
    pub bitrate_bps: Option<u64>,
}

impl SourceProbe {
    /// Parse the ffprobe `-show_format -show_streams` JSON document.
    pub fn from_json(doc: &serde_json::Value) -> Result<Self, TranscodeError> {
        let streams = doc
            .get("streams")
            .and_then(|s| s.as_array())
            .ok_or_else(|| TranscodeError::Probe("no streams in probe output".into()))?;

        let video = streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
            .ok_or(TranscodeError::NoVideoStream)?;

        let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        if width == 0 || height == 0 {
            return Err(TranscodeError::Probe("video stream has no dimensions".into()));
        }

        let codec = video
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let frame_rate = video
            .get("avg_frame_rate")
            .or_else(|| video.get("r_frame_rate"))
            .and_then(|v| v.as_str())
            .and_then(parse_rational)
            .unwrap_or(0.0);

        let format = doc.get("format");
        let duration_secs = format
            .and_then(|f| f.get("duration"))
            .and_then(|d| d.as_str())
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);
        let bitrate_bps = format
            .and_then(|f| f.get("bit_rate"))
            .and_then(|b| b.as_str())
            .and_then(|b| b.parse::<u64>().ok());

        Ok(Self {
            duration_secs,
            width,
            height,
            codec,
            frame_rate,
            bitrate_bps,
        })
    }
}

/// ffprobe reports frame rates as rationals like "30000/1001".
fn parse_rational(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => s.trim().parse().ok(),
    }
}

/// Closed GOP sized to the segment boundary.
fn gop_size(frame_rate: f64) -> u32 {
    let fps = if frame_rate > 0.0 { frame_rate } else { 30.0 };
    (fps * SEGMENT_SECONDS as f64).round().max(1.0) as u32
}

/// Identifies where a video's outputs live in the store.
#[derive(Debug, Clone, Copy)]
pub struct VideoRef {
    pub video_id: Uuid,
    pub chapter_id: Uuid,
    pub course_id: Uuid,
}

/// Inputs for one end-to-end transcode.
pub struct TranscodeRequest {
    pub target: VideoRef,
    pub input: PathBuf,
    pub scratch_dir: PathBuf,
    pub encryption: Option<EncryptionKey>,
    /// Best-effort progress side channel, 0-100.
    pub progress: Option<UnboundedSender<u8>>,
}

/// One produced rung.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub quality: Quality,
    pub playlist_url: String,
}

/// Output of a successful transcode.
#[derive(Debug, Clone)]
pub struct RenditionSet {
    pub master_key: String,
    pub master_url: String,
    pub renditions: Vec<Rendition>,
    pub source: SourceProbe,
}

#[async_trait]
pub trait TranscodingEngine: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<SourceProbe, TranscodeError>;

    /// Produce the full rendition ladder plus master playlist and upload
    /// everything. Never partial: any rung failing fails the whole call.
    async fn transcode(&self, req: TranscodeRequest) -> Result<RenditionSet, TranscodeError>;

    /// Extract one thumbnail every `interval_secs` across the whole
    /// duration and upload each. A zero duration yields an empty set.
    async fn thumbnails(
        &self,
        target: VideoRef,
        input: &Path,
        scratch_dir: &Path,
        interval_secs: u32,
    ) -> Result<Vec<Thumbnail>, TranscodeError>;
}

/// ffmpeg-backed engine.
#[derive(Clone)]
pub struct FfmpegEngine<C, S> {
    runner: C,
    storage: S,
    /// Base of the key-delivery endpoint written into encrypted playlists.
    key_delivery_base: String,
}

impl<C, S> FfmpegEngine<C, S>
where
    C: MediaRunner,
    S: ObjectStorePort,
{
    pub fn new(runner: C, storage: S, key_delivery_base: impl Into<String>) -> Self {
        Self {
            runner,
            storage,
            key_delivery_base: key_delivery_base.into(),
        }
    }

    /// Write the AES key file and the ffmpeg key-info sidecar. Both stay in
    /// the scratch directory; only the key URI ends up in the playlists.
    async fn write_key_info(
        &self,
        scratch: &Path,
        video_id: Uuid,
        key: &EncryptionKey,
    ) -> Result<PathBuf, TranscodeError> {
        let key_bytes = key
            .key_bytes()
            .map_err(|e| TranscodeError::BadKey(e.to_string()))?;
        let key_path = scratch.join("segment.key");
        tokio::fs::write(&key_path, key_bytes).await?;

        let uri = format!(
            "{}/{}",
            self.key_delivery_base.trim_end_matches('/'),
            video_id
        );
        let info_path = scratch.join("segment.keyinfo");
        let contents = format!("{}\n{}\n{}\n", uri, key_path.display(), key.iv_hex);
        tokio::fs::write(&info_path, contents).await?;
        Ok(info_path)
    }

    async fn upload_rung_dir(
        &self,
        rung_dir: &Path,
        target: &VideoRef,
        quality: Quality,
    ) -> Result<(), TranscodeError> {
        let mut entries = tokio::fs::read_dir(rung_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let key = keys::hls_key(
                &target.course_id,
                &target.chapter_id,
                &target.video_id,
                quality.label(),
                &name,
            );
            let content_type = if name.ends_with(".m3u8") {
                Some("application/vnd.apple.mpegurl")
            } else if name.ends_with(".ts") {
                Some("video/mp2t")
            } else {
                None
            };
            self.storage
                .upload(&entry.path(), &key, content_type)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<C, S> TranscodingEngine for FfmpegEngine<C, S>
where
    C: MediaRunner,
    S: ObjectStorePort,
{
    async fn probe(&self, input: &Path) -> Result<SourceProbe, TranscodeError> {
        let output = self
            .runner
            .run_ffprobe(input)
            .await
            .map_err(|e| TranscodeError::Probe(e.to_string()))?;
        if !output.status.success() {
            return Err(TranscodeError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let doc: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| TranscodeError::Probe(format!("unparseable probe output: {e}")))?;
        SourceProbe::from_json(&doc)
    }

    async fn transcode(&self, req: TranscodeRequest) -> Result<RenditionSet, TranscodeError> {
        let source = self.probe(&req.input).await?;
        let ladder = select_ladder(source.height);
        let gop = gop_size(source.frame_rate);
        info!(
            video = %req.target.video_id,
            height = source.height,
            rungs = ladder.len(),
            "starting transcode"
        );

        let key_info = match &req.encryption {
            Some(key) => Some(
                self.write_key_info(&req.scratch_dir, req.target.video_id, key)
                    .await?,
            ),
            None => None,
        };

        let mut master = MasterPlaylist::new();
        let mut renditions = Vec::with_capacity(ladder.len());
        for (done, quality) in ladder.iter().copied().enumerate() {
            let rung_dir = req.scratch_dir.join(quality.label());
            tokio::fs::create_dir_all(&rung_dir).await?;

            let args = rung_args(&req.input, &rung_dir, quality, gop, key_info.as_deref());
            let output = self.runner.run_ffmpeg(&args).await?;
            if !output.status.success() {
                return Err(TranscodeError::Encoder {
                    stage: quality.label(),
                    detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            debug!(video = %req.target.video_id, %quality, "rung encoded");

            self.upload_rung_dir(&rung_dir, &req.target, quality).await?;

            let playlist_key = keys::hls_key(
                &req.target.course_id,
                &req.target.chapter_id,
                &req.target.video_id,
                quality.label(),
                "playlist.m3u8",
            );
            renditions.push(Rendition {
                quality,
                playlist_url: self.storage.public_url(&playlist_key),
            });
            master.push(quality);

            if let Some(tx) = &req.progress {
                // The last few points are left for master upload and record
                // bookkeeping.
                let _ = tx.send(((done + 1) * 90 / ladder.len()) as u8);
            }
        }

        let master_key = keys::hls_key(
            &req.target.course_id,
            &req.target.chapter_id,
            &req.target.video_id,
            keys::MASTER_SEGMENT,
            "playlist.m3u8",
        );
        let master_path = req.scratch_dir.join("master.m3u8");
        master.write_to(&master_path).await?;
        self.storage
            .upload(&master_path, &master_key, Some("application/vnd.apple.mpegurl"))
            .await?;

        if let Some(tx) = &req.progress {
            let _ = tx.send(95);
        }

        Ok(RenditionSet {
            master_url: self.storage.public_url(&master_key),
            master_key,
            renditions,
            source,
        })
    }

    async fn thumbnails(
        &self,
        target: VideoRef,
        input: &Path,
        scratch_dir: &Path,
        interval_secs: u32,
    ) -> Result<Vec<Thumbnail>, TranscodeError> {
        let source = self.probe(input).await?;
        let count = if interval_secs == 0 {
            0
        } else {
            (source.duration_secs / interval_secs as f64).floor() as usize
        };

        // Keep the source aspect at a fixed width; height stays even for
        // the encoder.
        let mut height = THUMB_WIDTH * source.height / source.width.max(1);
        if height % 2 == 1 {
            height += 1;
        }

        let mut thumbnails = Vec::with_capacity(count);
        for index in 0..count {
            let offset = index as u32 * interval_secs;
            let out_path = scratch_dir.join(format!("thumb_{index}.jpg"));
            let args = thumbnail_args(input, &out_path, offset);
            let output = self.runner.run_ffmpeg(&args).await?;
            if !output.status.success() {
                return Err(TranscodeError::Encoder {
                    stage: "thumbnail",
                    detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            let key = keys::thumbnail_key(
                &target.course_id,
                &target.chapter_id,
                &target.video_id,
                index,
            );
            self.storage
                .upload(&out_path, &key, Some("image/jpeg"))
                .await?;
            thumbnails.push(Thumbnail {
                video_id: target.video_id,
                url: self.storage.public_url(&key),
                storage_key: key,
                time_offset_secs: offset,
                width: THUMB_WIDTH,
                height,
            });
        }
        info!(video = %target.video_id, count = thumbnails.len(), "thumbnails generated");
        Ok(thumbnails)
    }
}

/// ffmpeg arguments for one rung: scaled libx264/aac, 6-second segments
/// with the GOP closed on the segment boundary, VOD playlist.
fn rung_args(
    input: &Path,
    rung_dir: &Path,
    quality: Quality,
    gop: u32,
    key_info: Option<&Path>,
) -> Vec<String> {
    let bitrate = quality.bitrate_kbps();
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
        "-vf".into(),
        format!("scale=-2:{}", quality.height()),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-profile:v".into(),
        "main".into(),
        "-b:v".into(),
        format!("{bitrate}k"),
        "-maxrate".into(),
        format!("{}k", bitrate * 107 / 100),
        "-bufsize".into(),
        format!("{}k", bitrate * 3 / 2),
        "-sc_threshold".into(),
        "0".into(),
        "-g".into(),
        gop.to_string(),
        "-keyint_min".into(),
        gop.to_string(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ar".into(),
        "48000".into(),
        "-hls_time".into(),
        SEGMENT_SECONDS.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        rung_dir.join("%03d.ts").display().to_string(),
    ];
    if let Some(info) = key_info {
        args.push("-hls_key_info_file".into());
        args.push(info.display().to_string());
    }
    args.push(rung_dir.join("playlist.m3u8").display().to_string());
    args
}

fn thumbnail_args(input: &Path, out_path: &Path, offset_secs: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-ss".into(),
        offset_secs.to_string(),
        "-i".into(),
        input.display().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        format!("scale={THUMB_WIDTH}:-2"),
        "-q:v".into(),
        "4".into(),
        out_path.display().to_string(),
    ]
}
