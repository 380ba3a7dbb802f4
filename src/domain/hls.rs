//! HLS master playlist synthesis.
//!
//! Rung playlists and segments come straight out of the encoder; only the
//! master manifest enumerating the renditions is written here.

use std::path::Path;

use super::quality::Quality;

pub struct VariantEntry {
    pub quality: Quality,
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
}

pub struct MasterPlaylist {
    pub version: u8,
    pub variants: Vec<VariantEntry>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self {
            version: 3,
            variants: Vec::new(),
        }
    }

    pub fn push(&mut self, quality: Quality) {
        self.variants.push(VariantEntry {
            quality,
            bandwidth: quality.bandwidth(),
            width: quality.width(),
            height: quality.height(),
        });
    }

    /// Render the manifest. Each rung is referenced relative to the master's
    /// own directory: `../{quality}/playlist.m3u8`.
    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        for variant in &self.variants {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
                variant.bandwidth, variant.width, variant.height
            ));
            out.push_str(&format!("../{}/playlist.m3u8\n", variant.quality));
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        tokio::fs::write(path, self.render()).await
    }
}

impl Default for MasterPlaylist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_stream_inf_per_rung() {
        let mut master = MasterPlaylist::new();
        master.push(Quality::Q480);
        master.push(Quality::Q720);

        let rendered = master.render();

        assert!(rendered.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert_eq!(rendered.matches("#EXT-X-STREAM-INF").count(), 2);
        assert!(rendered.contains("#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=854x480"));
        assert!(rendered.contains("#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720"));
        assert!(rendered.contains("../480p/playlist.m3u8"));
        assert!(rendered.contains("../720p/playlist.m3u8"));
    }

    #[test]
    fn rung_reference_follows_its_stream_inf_line() {
        let mut master = MasterPlaylist::new();
        master.push(Quality::Q1080);
        let rendered = master.render();
        let lines: Vec<&str> = rendered.lines().collect();
        let inf = lines
            .iter()
            .position(|l| l.starts_with("#EXT-X-STREAM-INF"))
            .unwrap();
        assert_eq!(lines[inf + 1], "../1080p/playlist.m3u8");
    }

    #[tokio::test]
    async fn writes_rendered_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        let mut master = MasterPlaylist::new();
        master.push(Quality::Q480);
        master.write_to(&path).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, master.render());
    }
}
