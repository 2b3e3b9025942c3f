//! Découverte de fichiers annexes (pochettes, sous-titres, fanart).
//!
//! La résolution suit deux listes configurées : des gabarits de noms probés
//! dans le dossier de l'item, puis des motifs `(répertoire, extension)`
//! énumérés relativement à ce dossier. Les gabarits acceptent les balises
//! `%album%`, `%albumArtist%`, `%artist%`, `%genre%`, `%title%`,
//! `%composer%` et `%filename%`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::RegexBuilder;
use tracing::debug;

use pmocds::{CdsObject, MetaField};

/// Listes de recherche d'un handler de contenu annexe.
#[derive(Debug, Clone, Default)]
pub struct ContentPathConfig {
    /// Gabarits de noms probés directement (`cover.jpg`, `%filename%.srt`…).
    pub names: Vec<String>,
    /// Motifs `(répertoire, extension)` ; l'extension peut porter un radical
    /// glob (`cover.*`, `*.srt`).
    pub patterns: Vec<(String, String)>,
    pub case_sensitive: bool,
}

/// Résolveur de chemins annexes.
#[derive(Debug, Clone)]
pub struct ContentPathSetup {
    config: ContentPathConfig,
}

impl ContentPathSetup {
    pub fn new(config: ContentPathConfig) -> Self {
        ContentPathSetup { config }
    }

    /// Tous les fichiers annexes trouvés pour `obj`, dans l'ordre de
    /// découverte. Une liste vide signifie « pas de fichier annexe ».
    ///
    /// `folder` remplace le dossier déduit de la localisation de l'objet
    /// (dossier lui-même pour un container, parent pour un item).
    pub fn content_paths(&self, obj: &CdsObject, folder: Option<&Path>) -> Vec<PathBuf> {
        let folder = match folder {
            Some(f) => f.to_path_buf(),
            None if obj.is_container() => obj.location.clone(),
            None => match obj.location.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return Vec::new(),
            },
        };

        let mut result = Vec::new();
        if self.config.names.is_empty() && self.config.patterns.is_empty() {
            return result;
        }

        if self.config.case_sensitive {
            for name in &self.config.names {
                let candidate = folder.join(expand_name(name, obj));
                if candidate.is_file() {
                    debug!(path = %candidate.display(), "sidecar found");
                    result.push(candidate);
                }
            }
        } else if !self.config.names.is_empty() {
            // Une seule énumération du dossier, comparaison en casse repliée
            let mut folded: BTreeMap<String, PathBuf> = BTreeMap::new();
            if let Ok(entries) = fs::read_dir(&folder) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_file() {
                        if let Some(name) = path.file_name() {
                            folded.insert(name.to_string_lossy().to_lowercase(), path);
                        }
                    }
                }
            }
            for name in &self.config.names {
                let wanted = expand_name(name, obj).to_lowercase();
                if let Some(path) = folded.get(&wanted) {
                    debug!(path = %path.display(), "sidecar found");
                    result.push(path.clone());
                }
            }
        }

        for (dir, ext) in &self.config.patterns {
            let dir = PathBuf::from(expand_name(dir, obj));
            let dir = if dir.is_relative() { folder.join(dir) } else { dir };
            if !dir.is_dir() {
                continue;
            }

            let template = PathBuf::from(expand_name(ext, obj));
            let (stem, extension) = if template.extension().is_some() {
                (
                    template
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    template.extension().unwrap().to_string_lossy().into_owned(),
                )
            } else {
                (String::new(), template.to_string_lossy().into_owned())
            };
            let stem_re = (!stem.is_empty())
                .then(|| glob_regex(&stem, self.config.case_sensitive))
                .flatten();

            let Ok(entries) = fs::read_dir(&dir) else { continue };
            let mut found: Vec<PathBuf> = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(file_ext) = path.extension().map(|e| e.to_string_lossy()) else {
                    continue;
                };
                let ext_matches = if self.config.case_sensitive {
                    file_ext == extension.as_str()
                } else {
                    file_ext.eq_ignore_ascii_case(&extension)
                };
                if !ext_matches {
                    continue;
                }
                if let Some(re) = &stem_re {
                    let file_stem = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if !re.is_match(&file_stem) {
                        continue;
                    }
                }
                debug!(path = %path.display(), "sidecar found");
                found.push(path);
            }
            // read_dir n'ordonne pas ; on fixe l'ordre de découverte
            found.sort();
            result.extend(found);
        }

        result
    }
}

/// Compile le radical glob (`*`, `?`) en expression anchorée.
fn glob_regex(stem: &str, case_sensitive: bool) -> Option<regex::Regex> {
    let mut pattern = String::from("^");
    for c in stem.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    RegexBuilder::new(&pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .ok()
}

/// Développe les balises `%…%` d'un gabarit depuis les métadonnées de l'objet.
pub fn expand_name(name: &str, obj: &CdsObject) -> String {
    let mut expanded = name.to_string();
    let tags: &[(&str, MetaField)] = &[
        ("%album%", MetaField::Album),
        ("%albumArtist%", MetaField::AlbumArtist),
        ("%artist%", MetaField::Artist),
        ("%genre%", MetaField::Genre),
        ("%title%", MetaField::Title),
        ("%composer%", MetaField::Composer),
    ];
    for (tag, field) in tags {
        if expanded.contains(tag) {
            expanded = expanded.replace(tag, obj.meta(*field).unwrap_or(""));
        }
    }
    if expanded.contains("%filename%") {
        let filename = if obj.is_container() {
            if obj.title.is_empty() {
                obj.location
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                obj.title.clone()
            }
        } else {
            obj.location
                .file_stem()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        expanded = expanded.replace("%filename%", &filename);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(names: &[&str], patterns: &[(&str, &str)], case_sensitive: bool) -> ContentPathSetup {
        ContentPathSetup::new(ContentPathConfig {
            names: names.iter().map(|s| s.to_string()).collect(),
            patterns: patterns
                .iter()
                .map(|(d, e)| (d.to_string(), e.to_string()))
                .collect(),
            case_sensitive,
        })
    }

    #[test]
    fn case_folded_lookup_matches_differently_cased_file() {
        // Propriété : Cover.JPG + gabarit cover.jpg → un seul résultat en
        // mode insensible, zéro en mode sensible
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cover.JPG"), b"jpg").unwrap();
        let track = dir.path().join("piste.mp3");
        std::fs::write(&track, b"mp3").unwrap();
        let obj = CdsObject::item(&track, "audio/mpeg");

        let insensitive = setup(&["cover.jpg"], &[], false);
        let found = insensitive.content_paths(&obj, None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], dir.path().join("Cover.JPG"));

        let sensitive = setup(&["cover.jpg"], &[], true);
        assert!(sensitive.content_paths(&obj, None).is_empty());
    }

    #[test]
    fn template_expansion_uses_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Sky Valley.jpg"), b"art").unwrap();
        let track = dir.path().join("01.mp3");
        std::fs::write(&track, b"mp3").unwrap();
        let mut obj = CdsObject::item(&track, "audio/mpeg");
        obj.add_meta(MetaField::Album, "Sky Valley");

        let found = setup(&["%album%.jpg"], &[], true).content_paths(&obj, None);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn filename_tag_takes_the_stem_for_items() {
        let obj = CdsObject::item("/media/films/Le Film.mkv", "video/x-matroska");
        assert_eq!(expand_name("%filename%.srt", &obj), "Le Film.srt");
    }

    #[test]
    fn directory_patterns_enumerate_matching_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let art = dir.path().join("art");
        std::fs::create_dir(&art).unwrap();
        std::fs::write(art.join("front.jpg"), b"a").unwrap();
        std::fs::write(art.join("back.jpg"), b"b").unwrap();
        std::fs::write(art.join("notes.txt"), b"c").unwrap();
        let track = dir.path().join("01.flac");
        std::fs::write(&track, b"flac").unwrap();
        let obj = CdsObject::item(&track, "audio/flac");

        let found = setup(&[], &[("art", "jpg")], false).content_paths(&obj, None);
        assert_eq!(found.len(), 2);

        // Radical glob : seuls les fronts matchent
        let fronts = setup(&[], &[("art", "fr*.jpg")], false).content_paths(&obj, None);
        assert_eq!(fronts.len(), 1);
        assert_eq!(fronts[0], art.join("front.jpg"));
    }

    #[test]
    fn no_sidecar_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("x.mp3");
        std::fs::write(&track, b"mp3").unwrap();
        let obj = CdsObject::item(&track, "audio/mpeg");
        assert!(setup(&["cover.jpg"], &[], false)
            .content_paths(&obj, None)
            .is_empty());
    }
}
