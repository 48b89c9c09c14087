//! Source tree discovery and media classification.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Image extensions accepted for import, lower case without the dot.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "bmp", "cr2", "dng", "heic"];

/// Video extensions accepted for import, lower case without the dot.
pub const VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "mov", "avi", "mkv", "flv", "wmv", "mpeg", "webm", "3gp"];

/// Kind of media derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    /// Classifies a path by its extension, case-insensitively.
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return MediaKind::Unsupported,
        };

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Unsupported
        }
    }
}

/// A discovered source file; never mutated after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub folder: PathBuf,
    pub file_name: String,
    pub kind: MediaKind,
}

impl MediaFile {
    pub fn new(folder: PathBuf, file_name: String) -> Self {
        let kind = MediaKind::from_path(Path::new(&file_name));
        Self { folder, file_name, kind }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let folder = path.parent()?.to_path_buf();
        let file_name = path.file_name()?.to_str()?.to_string();
        Some(Self::new(folder, file_name))
    }

    /// Absolute source path.
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.file_name)
    }

    /// Lower-case extension without the dot.
    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
            .to_string()
    }
}

/// Platform junk such as AppleDouble resource forks and Finder metadata.
pub fn is_junk_name(name: &str) -> bool {
    name.starts_with("._") || name == ".DS_Store"
}

/// Entries that survive the junk and directory filters, before extension filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    Media(MediaFile),
    Unsupported(PathBuf),
}

/// Orders folders by their full path string, so `a b` comes before `a/x`.
/// Files are then listed lazily, one folder at a time, sorted by name.
pub fn discover(root: &Path) -> impl Iterator<Item = Discovered> + use<> {
    let mut folders: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Error accessing path during discovery: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();
    folders.sort_by_cached_key(|folder| folder.to_string_lossy().into_owned());

    folders.into_iter().flat_map(|folder| list_folder(&folder))
}

/// Sorted candidate files directly inside one folder.
fn list_folder(folder: &Path) -> Vec<Discovered> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Failed to read folder {}: {}", folder.display(), err);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    names
        .into_iter()
        .filter_map(|name| {
            if is_junk_name(&name) {
                debug!("Skipping system file: {}", name);
                return None;
            }
            let path = folder.join(&name);
            // Follows symlinks, so a link to a directory is not a file.
            if !path.is_file() {
                return None;
            }
            let file = MediaFile::new(folder.to_path_buf(), name);
            if file.kind == MediaKind::Unsupported {
                debug!("Skipping unsupported file: {}", path.display());
                Some(Discovered::Unsupported(path))
            } else {
                Some(Discovered::Media(file))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_kind_is_case_insensitive() {
        assert_eq!(MediaKind::from_path(Path::new("a/IMG_1.JPG")), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("clip.MoV")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), MediaKind::Unsupported);
        assert_eq!(MediaKind::from_path(Path::new("README")), MediaKind::Unsupported);
    }

    #[test]
    fn test_discovery_order_and_filters() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b/2.jpg"));
        touch(&root.join("b/1.mov"));
        touch(&root.join("a/z.png"));
        touch(&root.join("a/._z.png"));
        touch(&root.join("a/.DS_Store"));
        touch(&root.join("a/readme.txt"));
        touch(&root.join("top.heic"));
        fs::create_dir_all(root.join("a/fake.jpg")).unwrap();

        let found: Vec<Discovered> = discover(root).collect();

        let media: Vec<String> = found
            .iter()
            .filter_map(|d| match d {
                Discovered::Media(m) => {
                    Some(m.path().strip_prefix(root).unwrap().to_string_lossy().into_owned())
                }
                Discovered::Unsupported(_) => None,
            })
            .collect();
        assert_eq!(media, vec!["top.heic", "a/z.png", "b/1.mov", "b/2.jpg"]);

        let unsupported: Vec<&Discovered> = found
            .iter()
            .filter(|d| matches!(d, Discovered::Unsupported(_)))
            .collect();
        assert_eq!(unsupported.len(), 1);
    }

    #[test]
    fn test_folders_sort_by_full_path_string() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a/3.jpg"));
        touch(&root.join("a/x/1.jpg"));
        touch(&root.join("a b/2.jpg"));

        let order: Vec<String> = discover(root)
            .filter_map(|d| match d {
                Discovered::Media(m) => {
                    Some(m.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
                }
                Discovered::Unsupported(_) => None,
            })
            .collect();
        assert_eq!(order, vec!["a/3.jpg", "a b/2.jpg", "a/x/1.jpg"]);
    }

    #[test]
    fn test_media_file_parts() {
        let file = MediaFile::new(PathBuf::from("/src/2019"), "Holiday.Beach.JPG".to_string());
        assert_eq!(file.kind, MediaKind::Image);
        assert_eq!(file.extension(), "jpg");
        assert_eq!(file.stem(), "Holiday.Beach");
        assert_eq!(file.path(), PathBuf::from("/src/2019/Holiday.Beach.JPG"));
    }

    #[test]
    fn test_junk_names() {
        assert!(is_junk_name("._IMG_0001.JPG"));
        assert!(is_junk_name(".DS_Store"));
        assert!(!is_junk_name("IMG_0001.JPG"));
    }
}
