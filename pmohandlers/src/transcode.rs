//! Transcodage à la demande, avec cache partagé par profil.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pmocds::{render_protocol_info, CdsObject, CdsResource, HandlerType, ObjectId, ResAttr};

use crate::file::open_file;
use crate::registry::MetadataHandler;
use crate::{ContentSource, HandlerError, Result};

const HANDLER_NAME: &str = "transcode";

/// Paramètre de ressource portant le nom du profil.
pub const PROFILE_PARAMETER: &str = "profile";

/// Un profil de transcodage externe.
///
/// `command` est lancé avec `args`, où `%in` et `%out` sont remplacés par le
/// fichier source et le fichier de sortie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub name: String,
    /// Préfixe MIME des sources acceptées (`audio/`, `video/`…).
    pub source_prefix: String,
    /// Type MIME produit, annoncé dans le protocolInfo.
    pub target_mime: String,
    pub command: String,
    pub args: Vec<String>,
    /// Extension des fichiers produits dans le cache.
    pub extension: String,
}

/// Cache disque des sorties de transcodage.
///
/// La clé est `(id objet, nom de profil)` ; un verrou par clé garantit au
/// plus un processus en vol pour des requêtes concurrentes identiques, les
/// suivantes servent le fichier produit.
pub struct TranscodeCache {
    dir: PathBuf,
    inflight: Mutex<HashMap<(ObjectId, String), Arc<Mutex<()>>>>,
}

impl TranscodeCache {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(TranscodeCache {
            dir,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    fn gate(&self, key: (ObjectId, String)) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap();
        inflight.entry(key).or_default().clone()
    }

    fn cached_path(&self, id: ObjectId, profile: &TranscodeProfile) -> PathBuf {
        self.dir
            .join(format!("{id}-{}.{}", profile.name, profile.extension))
    }
}

/// Handler de ré-encodage externe.
pub struct TranscodeHandler {
    profiles: Vec<TranscodeProfile>,
    cache: TranscodeCache,
}

impl TranscodeHandler {
    pub fn new(profiles: Vec<TranscodeProfile>, cache: TranscodeCache) -> Self {
        TranscodeHandler { profiles, cache }
    }

    fn profile(&self, name: &str) -> Result<&TranscodeProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| HandlerError::failed(HANDLER_NAME, format!("unknown profile '{name}'")))
    }

    fn run_profile(&self, profile: &TranscodeProfile, obj: &CdsObject, out: &PathBuf) -> Result<()> {
        let input = obj.location.to_string_lossy();
        let part = out.with_extension(format!("{}.part", profile.extension));
        let args: Vec<String> = profile
            .args
            .iter()
            .map(|a| {
                a.replace("%in", input.as_ref())
                    .replace("%out", &part.to_string_lossy())
            })
            .collect();

        debug!(command = %profile.command, ?args, "starting transcoder");
        let status = Command::new(&profile.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| HandlerError::failed(HANDLER_NAME, e))?;
        if !status.success() {
            let _ = fs::remove_file(&part);
            return Err(HandlerError::failed(
                HANDLER_NAME,
                format!("transcoder exited with {status}"),
            ));
        }
        fs::rename(&part, out).map_err(|e| HandlerError::io(out.clone(), e))?;
        info!(output = %out.display(), "transcode finished");
        Ok(())
    }
}

impl MetadataHandler for TranscodeHandler {
    fn handler_type(&self) -> HandlerType {
        HandlerType::Transcode
    }

    fn accepts(&self, mime_type: &str, _extension: &str) -> bool {
        self.profiles
            .iter()
            .any(|p| mime_type.starts_with(&p.source_prefix))
    }

    fn fill_metadata(&self, obj: &mut CdsObject) -> Result<()> {
        obj.remove_resources_of(HandlerType::Transcode);
        let mime = obj.mime_type().to_string();
        for profile in self
            .profiles
            .iter()
            .filter(|p| mime.starts_with(&p.source_prefix))
        {
            let mut res = CdsResource::new(HandlerType::Transcode);
            res.set_attr(
                ResAttr::ProtocolInfo,
                render_protocol_info(&profile.target_mime),
            );
            res.set_parameter(PROFILE_PARAMETER, &profile.name);
            obj.add_resource(res);
        }
        Ok(())
    }

    fn serve_content(&self, obj: &CdsObject, res_index: usize) -> Result<Box<dyn ContentSource>> {
        let res = obj
            .resources
            .get(res_index)
            .ok_or(HandlerError::ResourceNotFound {
                id: obj.id,
                index: res_index,
            })?;
        let name = res
            .parameter(PROFILE_PARAMETER)
            .ok_or_else(|| HandlerError::failed(HANDLER_NAME, "resource carries no profile"))?;
        let profile = self.profile(name)?;

        let gate = self.cache.gate((obj.id, profile.name.clone()));
        let _inflight = gate.lock().unwrap();

        let cached = self.cache.cached_path(obj.id, profile);
        if !cached.is_file() {
            self.run_profile(profile, obj, &cached)?;
        } else {
            debug!(path = %cached.display(), "serving cached transcode");
        }
        open_file(&cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn copy_profile() -> TranscodeProfile {
        // `cp` joue le rôle d'un transcodeur : l'identité
        TranscodeProfile {
            name: "copie".to_string(),
            source_prefix: "audio/".to_string(),
            target_mime: "audio/L16".to_string(),
            command: "cp".to_string(),
            args: vec!["%in".to_string(), "%out".to_string()],
            extension: "pcm".to_string(),
        }
    }

    #[test]
    fn resources_are_offered_per_matching_profile() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranscodeCache::new(dir.path().join("cache")).unwrap();
        let handler = TranscodeHandler::new(vec![copy_profile()], cache);

        let mut track = CdsObject::item("/m/a.flac", "audio/flac");
        handler.fill_metadata(&mut track).unwrap();
        assert_eq!(track.resources.len(), 1);
        assert_eq!(
            track.resources[0].parameter(PROFILE_PARAMETER),
            Some("copie")
        );

        let mut photo = CdsObject::item("/m/a.jpg", "image/jpeg");
        handler.fill_metadata(&mut photo).unwrap();
        assert!(photo.resources.is_empty());
    }

    #[test]
    fn output_is_cached_between_requests() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.wav");
        std::fs::write(&source, b"des octets audio").unwrap();
        let cache = TranscodeCache::new(dir.path().join("cache")).unwrap();
        let handler = TranscodeHandler::new(vec![copy_profile()], cache);

        let mut track = CdsObject::item(&source, "audio/x-wav");
        track.id = 42;
        handler.fill_metadata(&mut track).unwrap();

        let mut first = handler.serve_content(&track, 0).unwrap();
        let mut bytes = Vec::new();
        first.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"des octets audio");

        // Le fichier est présent dans le cache, la seconde requête le sert
        std::fs::remove_file(&source).unwrap();
        let mut second = handler.serve_content(&track, 0).unwrap();
        bytes.clear();
        second.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"des octets audio");
    }
}
