//! Content-addressed storage key layout.
//!
//! Source upload:  `courses/{course}/chapters/{chapter}/videos/{ts}_{name}`
//! HLS outputs:    `courses/{course}/chapters/{chapter}/hls/{video}/{quality}/{file}`
//! Thumbnails:     `courses/{course}/chapters/{chapter}/thumbnails/{video}/thumb_{n}.jpg`

use uuid::Uuid;

/// Path segment of the master playlist directory, a sibling of the rung
/// directories so rung references stay relative (`../{quality}/...`).
pub const MASTER_SEGMENT: &str = "master";

pub fn source_key(
    course_id: &Uuid,
    chapter_id: &Uuid,
    timestamp_ms: i64,
    filename: &str,
) -> String {
    format!(
        "courses/{}/chapters/{}/videos/{}_{}",
        course_id,
        chapter_id,
        timestamp_ms,
        sanitize_filename(filename)
    )
}

pub fn hls_prefix(course_id: &Uuid, chapter_id: &Uuid, video_id: &Uuid) -> String {
    format!(
        "courses/{}/chapters/{}/hls/{}",
        course_id, chapter_id, video_id
    )
}

pub fn hls_key(
    course_id: &Uuid,
    chapter_id: &Uuid,
    video_id: &Uuid,
    quality: &str,
    file: &str,
) -> String {
    format!(
        "{}/{}/{}",
        hls_prefix(course_id, chapter_id, video_id),
        quality,
        file
    )
}

pub fn thumbnail_prefix(course_id: &Uuid, chapter_id: &Uuid, video_id: &Uuid) -> String {
    format!(
        "courses/{}/chapters/{}/thumbnails/{}",
        course_id, chapter_id, video_id
    )
}

pub fn thumbnail_key(
    course_id: &Uuid,
    chapter_id: &Uuid,
    video_id: &Uuid,
    index: usize,
) -> String {
    format!(
        "{}/thumb_{}.jpg",
        thumbnail_prefix(course_id, chapter_id, video_id),
        index
    )
}

/// Keep `[A-Za-z0-9._-]`; everything else becomes an underscore.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("my movie (1).mp4"), "my_movie__1_.mp4");
        assert_eq!(sanitize_filename("lecture-01_final.mov"), "lecture-01_final.mov");
        assert_eq!(sanitize_filename("vidéo.mp4"), "vid_o.mp4");
    }

    #[test]
    fn key_layout() {
        let course = Uuid::nil();
        let chapter = Uuid::nil();
        let video = Uuid::nil();

        assert_eq!(
            source_key(&course, &chapter, 1700000000000, "a b.mp4"),
            format!("courses/{course}/chapters/{chapter}/videos/1700000000000_a_b.mp4")
        );
        assert_eq!(
            hls_key(&course, &chapter, &video, "720p", "playlist.m3u8"),
            format!("courses/{course}/chapters/{chapter}/hls/{video}/720p/playlist.m3u8")
        );
        assert_eq!(
            hls_key(&course, &chapter, &video, MASTER_SEGMENT, "playlist.m3u8"),
            format!("courses/{course}/chapters/{chapter}/hls/{video}/master/playlist.m3u8")
        );
        assert_eq!(
            thumbnail_key(&course, &chapter, &video, 3),
            format!("courses/{course}/chapters/{chapter}/thumbnails/{video}/thumb_3.jpg")
        );
    }
}
