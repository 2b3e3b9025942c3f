//! Sonde de conteneur multimédia et extraction d'image par ffmpeg.

use std::io::Cursor;
use std::process::Command;

use serde_json::Value;

use pmocds::{
    render_protocol_info, CdsObject, CdsResource, HandlerType, ResAttr, CONTENT_TYPE_THUMBNAIL,
    RESOURCE_CONTENT_TYPE,
};

use crate::registry::MetadataHandler;
use crate::{ContentSource, HandlerError, Result};

const HANDLER_NAME: &str = "mediaprobe";

/// Commandes et réglages du sondeur.
#[derive(Debug, Clone)]
pub struct MediaProbeConfig {
    pub ffprobe: String,
    pub ffmpeg: String,
    /// Position de l'image extraite, en secondes depuis le début.
    pub thumbnail_seek_secs: u32,
}

impl Default for MediaProbeConfig {
    fn default() -> Self {
        MediaProbeConfig {
            ffprobe: "ffprobe".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            thumbnail_seek_secs: 5,
        }
    }
}

/// Durée, résolution et bitrate des vidéos, plus une image extraite à la
/// demande.
#[derive(Debug, Default)]
pub struct MediaProbeHandler {
    config: MediaProbeConfig,
}

impl MediaProbeHandler {
    pub fn new(config: MediaProbeConfig) -> Self {
        MediaProbeHandler { config }
    }
}

fn format_duration_f64(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!(
        "{}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

impl MetadataHandler for MediaProbeHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::MediaProbe
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        mime_type.starts_with("video/")
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        let output = Command::new(&self.config.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(&obj.location)
            .output()
            .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;
        if !output.status.success() {
            return Err(HandlerError::failed(
                HANDLER_NAME,
                format!("ffprobe exited with {}", output.status),
            ));
        }
        let probe: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;

        if let Some(main) = obj
            .resources
            .iter_mut()
            .find(|r| r.handler == HandlerType::Default)
        {
            if let Some(duration) = probe
                .pointer("/format/duration")
                .and_then(Value::as_str)
                .and_then(|d| d.parse::<f64>().ok())
            {
                main.set_attr(ResAttr::Duration, format_duration_f64(duration));
            }
            if let Some(bitrate) = probe
                .pointer("/format/bit_rate")
                .and_then(Value::as_str)
                .and_then(|b| b.parse::<u64>().ok())
            {
                main.set_attr(ResAttr::Bitrate, (bitrate / 1000).to_string());
            }
            let streams = probe
                .get("streams")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if let Some(video) = streams
                .iter()
                .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
            {
                if let (Some(w), Some(h)) = (
                    video.get("width").and_then(Value::as_u64),
                    video.get("height").and_then(Value::as_u64),
                ) {
                    main.set_attr(ResAttr::Resolution, format!("{w}x{h}"));
                }
            }
            if let Some(audio) = streams
                .iter()
                .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"))
            {
                if let Some(channels) = audio.get("channels").and_then(Value::as_u64) {
                    main.set_attr(ResAttr::NrAudioChannels, channels.to_string());
                }
            }
        }

        obj.remove_resources_of(HandlerType::MediaProbe);
        let mut thumb = CdsResource::new(HandlerType::MediaProbe);
        thumb.set_attr(ResAttr::ProtocolInfo, render_protocol_info("image/jpeg"));
        thumb.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_THUMBNAIL);
        obj.add_resource(thumb);
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, _res_index: usize) -> Result<Box<dyn ContentSource>> {
        let output = Command::new(&self.config.ffmpeg)
            .args(["-v", "quiet", "-ss", &self.config.thumbnail_seek_secs.to_string(), "-i"])
            .arg(&obj.location)
            .args(["-frames:v", "1", "-f", "mjpeg", "-"])
            .output()
            .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;
        if !output.status.success() || output.stdout.is_empty() {
            return Err(HandlerError::failed(
                HANDLER_NAME,
                format!("ffmpeg exited with {}", output.status),
            ));
        }
        Ok(Box::new(Cursor::new(output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting_truncates_to_seconds() {
        assert_eq!(format_duration_f64(0.0), "0:00:00");
        assert_eq!(format_duration_f64(59.9), "0:00:59");
        assert_eq!(format_duration_f64(7265.4), "2:01:05");
    }

    #[test]
    fn only_video_is_probed() {
        let handler = MediaProbeHandler::default();
        assert!(handler.accepts("video/x-matroska", "mkv"));
        assert!(!handler.accepts("audio/flac", "flac"));
    }
}
