//! Watch table of the event scanner.

use std::path::{Path, PathBuf};

use pmocatalog::AutoscanDirectory;

use crate::notifier::WatchDescriptor;

/// Autoscan attachment on a watched directory.
#[derive(Debug, Clone)]
pub struct WatchAutoscan {
    /// True on the autoscan root itself, false on watched descendants.
    pub start_point: bool,
    pub adir: AutoscanDirectory,
    /// Set when this watch stands in for a path that does not exist yet:
    /// the full location being waited for.
    pub nonexisting_path: Option<PathBuf>,
    /// Descriptors of watched descendants, tracked on the start point.
    pub descendants: Vec<WatchDescriptor>,
}

/// One attachment of a watched directory.
#[derive(Debug, Clone)]
pub enum Watch {
    Autoscan(WatchAutoscan),
    /// Ancestor watch used to detect moves of `remove_wd`'s directory.
    Move { remove_wd: WatchDescriptor },
}

/// State attached to one watch descriptor.
#[derive(Debug)]
pub struct WdEntry {
    pub path: PathBuf,
    pub parent_wd: WatchDescriptor,
    pub watches: Vec<Watch>,
}

impl WdEntry {
    pub fn new(path: PathBuf, parent_wd: WatchDescriptor) -> Self {
        WdEntry {
            path,
            parent_wd,
            watches: Vec::new(),
        }
    }

    /// Autoscan watch matching `adir` by location, ignoring non-existing
    /// placeholders.
    pub fn autoscan_for(&self, adir: &AutoscanDirectory) -> Option<&WatchAutoscan> {
        self.watches.iter().find_map(|w| match w {
            Watch::Autoscan(a)
                if a.nonexisting_path.is_none() && a.adir.location == adir.location =>
            {
                Some(a)
            }
            _ => None,
        })
    }

    /// Best autoscan for an event path: the one whose location is the
    /// longest prefix of `path`, compared on whole path components so that
    /// `/foo` never claims `/foobar`.
    pub fn appropriate_autoscan(&self, path: &Path) -> Option<&WatchAutoscan> {
        let mut best: Option<&WatchAutoscan> = None;
        for watch in &self.watches {
            if let Watch::Autoscan(a) = watch {
                if a.nonexisting_path.is_some() {
                    continue;
                }
                if path.starts_with(&a.adir.location) {
                    let better = match best {
                        Some(b) => {
                            a.adir.location.as_os_str().len() > b.adir.location.as_os_str().len()
                        }
                        None => true,
                    };
                    if better {
                        best = Some(a);
                    }
                }
            }
        }
        best
    }

    pub fn start_point(&self) -> Option<&WatchAutoscan> {
        self.watches.iter().find_map(|w| match w {
            Watch::Autoscan(a) if a.start_point => Some(a),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmocatalog::ScanMode;

    fn autoscan_watch(location: &str) -> Watch {
        Watch::Autoscan(WatchAutoscan {
            start_point: true,
            adir: AutoscanDirectory::new(location, ScanMode::Inotify),
            nonexisting_path: None,
            descendants: Vec::new(),
        })
    }

    #[test]
    fn prefix_match_respects_component_boundaries() {
        let mut entry = WdEntry::new(PathBuf::from("/"), -1);
        entry.watches.push(autoscan_watch("/foo"));

        assert!(entry
            .appropriate_autoscan(Path::new("/foo/bar.mp3"))
            .is_some());
        // /foobar n'est pas sous /foo
        assert!(entry
            .appropriate_autoscan(Path::new("/foobar/baz.mp3"))
            .is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let mut entry = WdEntry::new(PathBuf::from("/"), -1);
        entry.watches.push(autoscan_watch("/media"));
        entry.watches.push(autoscan_watch("/media/musique"));

        let best = entry
            .appropriate_autoscan(Path::new("/media/musique/a.flac"))
            .unwrap();
        assert_eq!(best.adir.location, PathBuf::from("/media/musique"));
    }
}
