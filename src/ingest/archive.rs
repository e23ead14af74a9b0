use crate::error::{SkipReason, TaskError};
use crate::models::{ArchiveTask, EntryRef, ImageEntry};
use anyhow::Context;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use tar::Archive;
use zip::ZipArchive;
use zstd::stream::read::Decoder as ZstdDecoder;

/// Recognised archive suffixes, matched case-insensitively
pub const ARCHIVE_SUFFIXES: &[&str] = &[".tar.zst", ".tzst", ".tar", ".zip"];

/// Largest member payload that is read into memory
pub const MAX_MEMBER_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Tar,
    TarZstd,
    Zip,
}

impl ArchiveKind {
    fn of(path: &Path) -> Option<Self> {
        let lower = path.file_name()?.to_str()?.to_ascii_lowercase();
        if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Some(ArchiveKind::TarZstd)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

/// Archive id for a path: the file name without its archive suffix.
/// `None` if the file is not a recognised archive.
pub fn archive_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let lower = name.to_ascii_lowercase();
    ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| name[..name.len() - suffix.len()].to_string())
        .filter(|id| !id.is_empty())
}

/// List the archives directly under `dir`, sorted by path, with distinct ids.
pub fn discover_archives(dir: &Path) -> anyhow::Result<Vec<ArchiveTask>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list input directory {:?}", dir))?;

    let mut tasks = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list input directory {:?}", dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(id) = archive_id(&path) {
            tasks.push(ArchiveTask::new(path, id));
        }
    }
    tasks.sort_by(|a, b| a.path.cmp(&b.path));
    make_ids_unique(&mut tasks);
    Ok(tasks)
}

/// Archives sharing an id (`a.tar` next to `a.zip`) use their full file
/// name instead. File names are unique within a directory, so this settles.
fn make_ids_unique(tasks: &mut [ArchiveTask]) {
    loop {
        let mut uses: HashMap<String, usize> = HashMap::new();
        for task in tasks.iter() {
            *uses.entry(task.id.clone()).or_default() += 1;
        }

        let mut changed = false;
        for task in tasks.iter_mut() {
            if uses[&task.id] < 2 {
                continue;
            }
            if let Some(name) = task.path.file_name().and_then(|n| n.to_str()) {
                if task.id != name {
                    task.id = name.to_string();
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Case-insensitive allow-list of image file extensions
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

/// One regular-file member of an archive
#[derive(Debug)]
pub enum ArchiveItem {
    /// Allow-listed member with its payload
    Image(ImageEntry),
    /// Member whose extension is not allow-listed; payload is never read
    Filtered(String),
    /// Allow-listed member whose payload is not read
    Skipped { name: String, reason: SkipReason },
}

enum Source {
    Tar(Archive<Box<dyn Read>>),
    Zip(ZipArchive<BufReader<File>>),
}

/// Lazily produced archive members
pub type ArchiveItems<'a> = Box<dyn Iterator<Item = Result<ArchiveItem, TaskError>> + 'a>;

/// Streams the members of a `.tar`, `.tar.zst` or `.zip` archive in stored order.
pub struct ArchiveReader {
    task: ArchiveTask,
    source: Source,
    filter: ExtensionFilter,
    max_member_bytes: u64,
}

impl ArchiveReader {
    pub fn open(task: &ArchiveTask, filter: ExtensionFilter) -> Result<Self, TaskError> {
        let open_err = |source| TaskError::Open {
            path: task.path.clone(),
            source,
        };

        let file = File::open(&task.path).map_err(open_err)?;
        let source = match ArchiveKind::of(&task.path) {
            Some(ArchiveKind::Zip) => {
                let zip = ZipArchive::new(BufReader::new(file)).map_err(|source| TaskError::Zip {
                    path: task.path.clone(),
                    source,
                })?;
                Source::Zip(zip)
            }
            Some(ArchiveKind::TarZstd) => {
                let reader: Box<dyn Read> = Box::new(ZstdDecoder::new(file).map_err(open_err)?);
                Source::Tar(Archive::new(reader))
            }
            Some(ArchiveKind::Tar) | None => {
                let reader: Box<dyn Read> = Box::new(BufReader::new(file));
                Source::Tar(Archive::new(reader))
            }
        };

        Ok(Self {
            task: task.clone(),
            source,
            filter,
            max_member_bytes: MAX_MEMBER_BYTES,
        })
    }

    /// Members declaring more than `limit` bytes are skipped unread
    pub fn with_max_member_bytes(mut self, limit: u64) -> Self {
        self.max_member_bytes = limit;
        self
    }

    /// Lazily enumerate members. A read error ends the usable part of the stream.
    pub fn entries(&mut self) -> Result<ArchiveItems<'_>, TaskError> {
        let path = self.task.path.clone();
        let members = MemberReader {
            archive_id: self.task.id.clone(),
            filter: &self.filter,
            limit: self.max_member_bytes,
        };

        match &mut self.source {
            Source::Tar(archive) => {
                let entries = archive.entries().map_err(|source| TaskError::Read {
                    path: path.clone(),
                    source,
                })?;

                Ok(Box::new(entries.filter_map(move |entry| {
                    let read_err = |source| TaskError::Read {
                        path: path.clone(),
                        source,
                    };
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => return Some(Err(read_err(e))),
                    };
                    if !entry.header().entry_type().is_file() {
                        return None;
                    }
                    let name = match entry.path() {
                        Ok(name) => name.to_string_lossy().trim_start_matches("./").to_string(),
                        Err(e) => return Some(Err(read_err(e))),
                    };
                    let size = entry.size();
                    Some(members.read(name, size, entry, &path))
                })))
            }
            Source::Zip(archive) => {
                let count = archive.len();
                Ok(Box::new((0..count).filter_map(move |index| {
                    let file = match archive.by_index(index) {
                        Ok(file) => file,
                        Err(source) => {
                            return Some(Err(TaskError::Zip {
                                path: path.clone(),
                                source,
                            }));
                        }
                    };
                    if file.is_dir() {
                        return None;
                    }
                    let name = file.name().to_string();
                    let size = file.size();
                    Some(members.read(name, size, file, &path))
                })))
            }
        }
    }
}

/// Turns one archive member into an `ArchiveItem`
struct MemberReader<'a> {
    archive_id: String,
    filter: &'a ExtensionFilter,
    limit: u64,
}

impl MemberReader<'_> {
    fn read<M: Read>(
        &self,
        name: String,
        size: u64,
        member: M,
        path: &Path,
    ) -> Result<ArchiveItem, TaskError> {
        if !self.filter.matches(&name) {
            return Ok(ArchiveItem::Filtered(name));
        }
        // Declared sizes are read from the archive, so cap them before allocating
        if size > self.limit {
            return Ok(ArchiveItem::Skipped {
                name,
                reason: SkipReason::TooLarge {
                    size,
                    limit: self.limit,
                },
            });
        }

        let mut bytes = Vec::with_capacity(size as usize);
        member
            .take(size)
            .read_to_end(&mut bytes)
            .map_err(|source| TaskError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(ArchiveItem::Image(ImageEntry {
            entry: EntryRef::new(self.archive_id.clone(), name),
            bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tar::{Builder, Header};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn append(builder: &mut Builder<File>, name: &str, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    fn ids_in(dir: &Path) -> Vec<String> {
        discover_archives(dir)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    fn read_all(task: &ArchiveTask) -> Vec<ArchiveItem> {
        let mut reader = ArchiveReader::open(task, ExtensionFilter::new(["png", "jpg"])).unwrap();
        reader.entries().unwrap().map(|i| i.unwrap()).collect()
    }

    #[test]
    fn archive_id_strips_known_suffixes() {
        assert_eq!(archive_id(Path::new("/in/batch01.tar")).as_deref(), Some("batch01"));
        assert_eq!(archive_id(Path::new("/in/batch02.TAR.ZST")).as_deref(), Some("batch02"));
        assert_eq!(archive_id(Path::new("/in/b.tzst")).as_deref(), Some("b"));
        assert_eq!(archive_id(Path::new("/in/c.zip")).as_deref(), Some("c"));
        assert_eq!(archive_id(Path::new("/in/notes.txt")), None);
        assert_eq!(archive_id(Path::new("/in/.tar")), None);
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let filter = ExtensionFilter::new(["png", ".JPG"]);
        assert!(filter.matches("dir/a.PNG"));
        assert!(filter.matches("b.jpg"));
        assert!(!filter.matches("c.jpeg"));
        assert!(!filter.matches("README"));
    }

    #[test]
    fn discovery_is_flat_and_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("b.tar"), b"").unwrap();
        fs::write(dir.path().join("a.tar.zst"), b"").unwrap();
        fs::write(dir.path().join("c.zip"), b"").unwrap();
        fs::write(dir.path().join("d.rar"), b"").unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("e.tar"), b"").unwrap();

        assert_eq!(ids_in(dir.path()), vec!["a", "b", "c"]);
    }

    #[test]
    fn clashing_ids_fall_back_to_file_names() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["batch01.tar", "batch01.tar.zst", "batch02.zip"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(
            ids_in(dir.path()),
            vec!["batch01.tar", "batch01.tar.zst", "batch02"]
        );

        // a stem equal to another archive's file name is resolved too
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["x.tar", "x.tar.tar", "x.zip"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(ids_in(dir.path()), vec!["x.tar", "x.tar.tar", "x.zip"]);
    }

    #[test]
    fn reader_yields_members_in_order_and_filters_extensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("set.tar");
        let mut builder = Builder::new(File::create(&path).unwrap());
        append(&mut builder, "img1.png", b"one");
        append(&mut builder, "notes.txt", b"skip me");
        append(&mut builder, "sub/img2.JPG", b"two");
        builder.into_inner().unwrap();

        let items = read_all(&ArchiveTask::new(path, "set"));

        assert_eq!(items.len(), 3);
        match &items[0] {
            ArchiveItem::Image(img) => {
                assert_eq!(img.entry, EntryRef::new("set", "img1.png"));
                assert_eq!(img.bytes, b"one");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&items[1], ArchiveItem::Filtered(name) if name == "notes.txt"));
        assert!(matches!(&items[2], ArchiveItem::Image(img) if img.entry.name == "sub/img2.JPG"));
    }

    #[test]
    fn zip_members_follow_central_directory_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("set.zip");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default();
        writer.add_directory("sub/", options).unwrap();
        for (name, data) in [("b.png", b"bee"), ("a.txt", b"aye"), ("sub/c.jpg", b"see")] {
            writer.start_file(name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();

        let items = read_all(&ArchiveTask::new(path, "set"));

        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], ArchiveItem::Image(img)
            if img.entry.name == "b.png" && img.bytes == b"bee"));
        assert!(matches!(&items[1], ArchiveItem::Filtered(name) if name == "a.txt"));
        assert!(matches!(&items[2], ArchiveItem::Image(img) if img.entry.name == "sub/c.jpg"));
    }

    #[test]
    fn corrupt_zip_fails_to_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.zip");
        fs::write(&path, vec![b'A'; 1024]).unwrap();
        let task = ArchiveTask::new(path, "bad");
        let err = ArchiveReader::open(&task, ExtensionFilter::new(["png"])).err().unwrap();
        assert!(matches!(err, TaskError::Zip { .. }));
    }

    #[test]
    fn oversized_member_is_skipped_without_reading() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("huge.tar");
        let mut builder = Builder::new(File::create(&path).unwrap());
        let mut header = Header::new_gnu();
        header.set_path("huge.png").unwrap();
        header.set_size(1 << 62);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
        builder.into_inner().unwrap();

        let task = ArchiveTask::new(path, "huge");
        let mut reader = ArchiveReader::open(&task, ExtensionFilter::new(["png"])).unwrap();
        let mut items = reader.entries().unwrap();

        match items.next() {
            Some(Ok(ArchiveItem::Skipped { name, reason })) => {
                assert_eq!(name, "huge.png");
                assert!(matches!(reason, SkipReason::TooLarge { size, .. } if size == 1 << 62));
            }
            other => panic!("unexpected {:?}", other),
        }
        // the declared payload is not there, so the stream ends in an error
        assert!(matches!(items.next(), Some(Err(TaskError::Read { .. }))));
    }

    #[test]
    fn member_limit_is_configurable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("set.tar");
        let mut builder = Builder::new(File::create(&path).unwrap());
        append(&mut builder, "big.png", &[7u8; 64]);
        append(&mut builder, "small.png", &[7u8; 8]);
        builder.into_inner().unwrap();

        let task = ArchiveTask::new(path, "set");
        let mut reader = ArchiveReader::open(&task, ExtensionFilter::new(["png"]))
            .unwrap()
            .with_max_member_bytes(16);
        let items: Vec<ArchiveItem> = reader.entries().unwrap().map(|i| i.unwrap()).collect();

        assert!(matches!(&items[0], ArchiveItem::Skipped { name, .. } if name == "big.png"));
        assert!(matches!(&items[1], ArchiveItem::Image(img) if img.bytes.len() == 8));
    }

    #[test]
    fn missing_archive_fails_to_open() {
        let task = ArchiveTask::new(PathBuf::from("/definitely/not/here.tar"), "here");
        let err = ArchiveReader::open(&task, ExtensionFilter::new(["png"])).err().unwrap();
        assert!(matches!(err, TaskError::Open { .. }));
    }
}
