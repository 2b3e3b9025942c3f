//! Extraction des tags audio et de la pochette embarquée via `lofty`.

use std::io::Cursor;

use lofty::config::ParseOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;

use pmocds::{
    render_protocol_info, CdsObject, CdsResource, HandlerType, MetaField, ResAttr,
    CONTENT_TYPE_ALBUM_ART, RESOURCE_CONTENT_TYPE,
};

use crate::registry::MetadataHandler;
use crate::{ContentSource, HandlerError, Result};

const HANDLER_NAME: &str = "audiotag";

/// Champs que ce handler possède ; purgés avant réécriture pour rester
/// idempotent.
const OWNED_FIELDS: &[MetaField] = &[
    MetaField::Title,
    MetaField::Artist,
    MetaField::Album,
    MetaField::AlbumArtist,
    MetaField::Genre,
    MetaField::Date,
    MetaField::TrackNumber,
    MetaField::PartNumber,
];

/// Tags (id3, vorbis…) et pochette embarquée des fichiers audio.
#[derive(Debug, Default)]
pub struct AudioTagHandler;

fn read_tagged(path: &std::path::Path) -> Result<lofty::file::TaggedFile> {
    Probe::open(path)
        .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?
        .options(ParseOptions::new())
        .read()
        .map_err(|e| HandlerError::failed(HANDLER_NAME, e))
}

fn format_duration(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl MetadataHandler for AudioTagHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::AudioTag
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        mime_type.starts_with("audio/")
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        let tagged = read_tagged(&obj.location)?;
        let properties = tagged.properties();
        let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

        for field in OWNED_FIELDS {
            obj.remove_meta(*field);
        }
        obj.remove_resources_of(HandlerType::AudioTag);

        if let Some(tag) = tag {
            if let Some(title) = tag.title() {
                obj.add_meta(MetaField::Title, title.to_string());
                obj.title = title.to_string();
            }
            if let Some(artist) = tag.artist() {
                obj.add_meta(MetaField::Artist, artist.to_string());
            }
            if let Some(album) = tag.album() {
                obj.add_meta(MetaField::Album, album.to_string());
            }
            if let Some(genre) = tag.genre() {
                obj.add_meta(MetaField::Genre, genre.to_string());
            }
            if let Some(year) = tag.year() {
                obj.add_meta(MetaField::Date, year.to_string());
            }
            if let Some(album_artist) = tag.get_string(&ItemKey::AlbumArtist) {
                obj.add_meta(MetaField::AlbumArtist, album_artist.to_string());
            }
            if let Some(composer) = tag.get_string(&ItemKey::Composer) {
                obj.add_meta(MetaField::Composer, composer.to_string());
            }
            if let Some(track) = tag.track() {
                obj.add_meta(MetaField::TrackNumber, track.to_string());
                if let Some(info) = obj.item_info_mut() {
                    info.track_number = track as i32;
                }
            }
            if let Some(disk) = tag.disk() {
                obj.add_meta(MetaField::PartNumber, disk.to_string());
                if let Some(info) = obj.item_info_mut() {
                    info.part_number = disk as i32;
                }
            }

            if let Some(picture) = tag.pictures().first() {
                let mime = picture
                    .mime_type()
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "image/jpeg".to_string());
                let mut res = CdsResource::new(HandlerType::AudioTag);
                res.set_attr(ResAttr::ProtocolInfo, render_protocol_info(&mime));
                res.set_parameter(RESOURCE_CONTENT_TYPE, CONTENT_TYPE_ALBUM_ART);
                obj.add_resource(res);
            }
        }

        // Propriétés du flux sur la ressource principale
        if let Some(main) = obj
            .resources
            .iter_mut()
            .find(|r| r.handler == HandlerType::Default)
        {
            main.set_attr(
                ResAttr::Duration,
                format_duration(properties.duration().as_secs()),
            );
            if let Some(bitrate) = properties.audio_bitrate() {
                main.set_attr(ResAttr::Bitrate, bitrate.to_string());
            }
            if let Some(rate) = properties.sample_rate() {
                main.set_attr(ResAttr::SampleFrequency, rate.to_string());
            }
            if let Some(channels) = properties.channels() {
                main.set_attr(ResAttr::NrAudioChannels, channels.to_string());
            }
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, _res_index: usize) -> Result<Box<dyn ContentSource>> {
        let tagged = read_tagged(&obj.location)?;
        let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
        let picture = tag
            .and_then(|t| t.pictures().first())
            .ok_or_else(|| HandlerError::failed(HANDLER_NAME, "no embedded picture"))?;
        Ok(Box::new(Cursor::new(picture.data().to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_rendered_as_didl_time() {
        assert_eq!(format_duration(0), "0:00:00");
        assert_eq!(format_duration(65), "0:01:05");
        assert_eq!(format_duration(3665), "1:01:05");
    }

    #[test]
    fn only_audio_mimes_are_accepted() {
        let handler = AudioTagHandler;
        assert!(handler.accepts("audio/flac", "flac"));
        assert!(!handler.accepts("video/mp4", "mp4"));
        assert!(!handler.accepts("", ""));
    }
}
