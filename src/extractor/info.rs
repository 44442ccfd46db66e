//! Metadata returned by `yt-dlp -J` and the summaries shown on the page.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::{format_duration, format_large_number};

/// Format id of the "let the extractor decide" pseudo-format
pub const BEST_FORMAT: &str = "best";

const DESCRIPTION_PREVIEW_CHARS: usize = 150;

/// Subset of the yt-dlp info JSON we care about
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInfo {
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub webpage_url: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub playlist_count: Option<u64>,
    #[serde(default)]
    pub entries: Vec<RawInfo>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// Total bitrate in KBit/s
    pub tbr: Option<f64>,
}

impl RawFormat {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    fn has_audio(&self) -> bool {
        !matches!(self.acodec.as_deref(), Some("none") | None)
    }
}

/// One selectable entry of the format picker
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FormatOption {
    pub id: String,
    pub resolution: String,
    pub fps: String,
    pub ext: String,
    pub note: String,
}

impl FormatOption {
    fn automatic() -> Self {
        Self {
            id: BEST_FORMAT.to_string(),
            resolution: "Automatic".to_string(),
            fps: "N/A".to_string(),
            ext: "MP4".to_string(),
            note: "Best combined quality (default)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSummary {
    pub url: String,
    pub title: String,
    pub channel: String,
    pub views: String,
    pub duration: String,
    pub thumbnail: Option<String>,
    pub description: String,
    pub formats: Vec<FormatOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistSummary {
    pub url: String,
    pub title: String,
    pub count: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaInfo {
    Playlist(PlaylistSummary),
    Single(VideoSummary),
}

impl MediaInfo {
    /// Builds the page summary for `url` from the raw extractor JSON
    pub fn from_raw(url: &str, raw: RawInfo) -> Self {
        let url = raw.webpage_url.clone().unwrap_or_else(|| url.to_string());

        if raw.kind.as_deref() == Some("playlist") {
            return Self::Playlist(PlaylistSummary {
                url,
                title: raw.title.unwrap_or_else(|| "Unknown playlist".to_string()),
                count: raw
                    .playlist_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                thumbnail: raw.entries.first().and_then(|e| e.thumbnail.clone()),
            });
        }

        Self::Single(VideoSummary {
            url,
            title: raw.title.unwrap_or_else(|| "Unknown title".to_string()),
            channel: raw.uploader.unwrap_or_else(|| "Unknown channel".to_string()),
            views: format_large_number(raw.view_count),
            duration: format_duration(raw.duration),
            thumbnail: raw.thumbnail,
            description: description_preview(raw.description.as_deref().unwrap_or_default()),
            formats: summarize_formats(&raw.formats),
        })
    }
}

fn description_preview(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or_default();
    let preview: String = first_line.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
    format!("{preview}...")
}

/// Ranks the available formats for the picker.
///
/// The automatic pseudo-format always comes first, followed by one entry per
/// distinct height (highest first). For each height the format with the
/// highest total bitrate wins. Audio-only formats are skipped; video-only ones
/// are kept since downloads merge in the best audio track.
pub fn summarize_formats(formats: &[RawFormat]) -> Vec<FormatOption> {
    let mut best_per_height: BTreeMap<u32, &RawFormat> = BTreeMap::new();

    for format in formats {
        let Some(height) = format.height else {
            continue;
        };
        if !format.has_video() || format.format_id.is_none() {
            continue;
        }

        let tbr = format.tbr.unwrap_or(0.0);
        match best_per_height.get(&height) {
            Some(current) if current.tbr.unwrap_or(0.0) >= tbr => {}
            _ => {
                best_per_height.insert(height, format);
            }
        }
    }

    let mut options = vec![FormatOption::automatic()];
    options.extend(best_per_height.iter().rev().map(|(height, format)| {
        FormatOption {
            id: format.format_id.clone().unwrap_or_default(),
            resolution: format!("{height}p"),
            fps: format
                .fps
                .map(|fps| format!("{fps:.0}"))
                .unwrap_or_else(|| "N/A".to_string()),
            ext: format
                .ext
                .as_deref()
                .unwrap_or("unk")
                .to_uppercase(),
            note: if format.has_audio() {
                "Muxed (video + audio)".to_string()
            } else {
                "Video, merged with best audio".to_string()
            },
        }
    }));
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, height: Option<u32>, tbr: f64, vcodec: &str, acodec: &str) -> RawFormat {
        RawFormat {
            format_id: Some(id.to_string()),
            height,
            fps: Some(30.0),
            ext: Some("mp4".to_string()),
            vcodec: Some(vcodec.to_string()),
            acodec: Some(acodec.to_string()),
            tbr: Some(tbr),
        }
    }

    #[test]
    fn formats_ranked_by_height_with_best_bitrate() {
        let formats = vec![
            format("140", None, 128.0, "none", "mp4a"),
            format("18", Some(360), 500.0, "avc1", "mp4a"),
            format("134", Some(360), 700.0, "avc1", "none"),
            format("137", Some(1080), 4000.0, "avc1", "none"),
            format("136", Some(720), 2500.0, "avc1", "none"),
            format("audio-hd", Some(720), 9000.0, "none", "opus"),
        ];

        let options = summarize_formats(&formats);
        let ids: Vec<&str> = options.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["best", "137", "136", "134"]);
        assert_eq!(options[1].resolution, "1080p");
        assert_eq!(options[1].ext, "MP4");
        assert_eq!(options[1].fps, "30");
    }

    #[test]
    fn automatic_format_always_present() {
        let options = summarize_formats(&[]);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, BEST_FORMAT);
    }

    #[test]
    fn playlist_summary_uses_first_entry_thumbnail() {
        let raw: RawInfo = serde_json::from_str(
            r#"{
                "_type": "playlist",
                "title": "Mix",
                "playlist_count": 12,
                "entries": [{"title": "a", "thumbnail": "https://img/a.jpg"}]
            }"#,
        )
        .unwrap();

        match MediaInfo::from_raw("https://example.com/list", raw) {
            MediaInfo::Playlist(p) => {
                assert_eq!(p.title, "Mix");
                assert_eq!(p.count, "12");
                assert_eq!(p.thumbnail.as_deref(), Some("https://img/a.jpg"));
                assert_eq!(p.url, "https://example.com/list");
            }
            other => panic!("expected playlist, got {other:?}"),
        }
    }

    #[test]
    fn single_summary_formats_fields() {
        let raw: RawInfo = serde_json::from_str(
            r#"{
                "title": "Clip",
                "uploader": "Someone",
                "view_count": 1234567,
                "duration": 75,
                "description": "First line\nsecond line",
                "webpage_url": "https://example.com/watch?v=1",
                "formats": [{"format_id": "22", "height": 720, "vcodec": "avc1", "acodec": "mp4a", "ext": "mp4"}]
            }"#,
        )
        .unwrap();

        match MediaInfo::from_raw("https://example.com/x", raw) {
            MediaInfo::Single(v) => {
                assert_eq!(v.channel, "Someone");
                assert_eq!(v.views, "1 234 567");
                assert_eq!(v.duration, "01m 15s");
                assert_eq!(v.description, "First line...");
                assert_eq!(v.url, "https://example.com/watch?v=1");
                assert_eq!(v.formats.len(), 2);
                assert_eq!(v.formats[1].note, "Muxed (video + audio)");
            }
            other => panic!("expected single video, got {other:?}"),
        }
    }
}
