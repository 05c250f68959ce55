//! Tar codec for workspace trees.
//!
//! Packing walks the tree in sorted path order, so the same tree always
//! produces the same entry sequence. Archives may be gzip-compressed; the
//! readers detect compression from the magic bytes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

use devbox_core::fs_policy::to_slash_path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DEFAULT_FILE_MODE: u32 = 0o644;

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

/// Compression applied to a packed archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn from_flag(gzip: bool) -> Self {
        if gzip {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// One decoded archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    Directory { path: String },
    File {
        path: String,
        content: Vec<u8>,
        /// Permission bits, e.g. `0o755` for an executable script.
        mode: u32,
    },
}

impl ArchiveEntry {
    pub fn path(&self) -> &str {
        match self {
            Self::Directory { path } | Self::File { path, .. } => path,
        }
    }
}

/// Pack every directory and regular file under `root` into `writer`.
///
/// Paths are stored relative to `root`. Symlinks and special files are skipped.
pub fn pack_dir<W: Write>(root: &Path, compression: Compression, writer: W) -> io::Result<W> {
    match compression {
        Compression::None => {
            let mut builder = Builder::new(writer);
            append_tree(&mut builder, root)?;
            builder.into_inner()
        }
        Compression::Gzip => {
            let encoder = GzEncoder::new(writer, flate2::Compression::default());
            let mut builder = Builder::new(encoder);
            append_tree(&mut builder, root)?;
            builder.into_inner()?.finish()
        }
    }
}

/// Pack `root` into a temporary file, removed when the handle is dropped.
pub fn pack_dir_to_tempfile(
    root: &Path,
    compression: Compression,
    spool_dir: &Path,
) -> io::Result<tempfile::NamedTempFile> {
    let spool = tempfile::Builder::new()
        .prefix(".sync-")
        .suffix(".tar")
        .tempfile_in(spool_dir)?;
    let file = pack_dir(root, compression, spool.reopen()?)?;
    file.sync_all()?;
    Ok(spool)
}

fn append_tree<W: Write>(builder: &mut Builder<W>, root: &Path) -> io::Result<()> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = to_slash_path(rel);
        let file_type = entry.file_type();
        let metadata = entry.metadata().map_err(io::Error::other)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if file_type.is_dir() {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_mtime(mtime);
            builder.append_data(&mut header, format!("{}/", name), io::empty())?;
        } else if file_type.is_file() {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            header.set_mode(file_mode(&metadata));
            header.set_mtime(mtime);
            let file = File::open(entry.path())?;
            builder.append_data(&mut header, &name, file)?;
        } else {
            tracing::debug!(path = %name, "Skipping non-regular workspace entry");
        }
    }

    Ok(())
}

fn decoder(bytes: &[u8]) -> Box<dyn Read + '_> {
    if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    }
}

/// Decode an archive into memory, preserving entry order.
pub fn read_entries(bytes: &[u8]) -> io::Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(decoder(bytes));
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().trim_end_matches('/').to_string();
        match entry.header().entry_type() {
            EntryType::Directory => entries.push(ArchiveEntry::Directory { path }),
            EntryType::Regular | EntryType::Continuous => {
                let mode = entry.header().mode().unwrap_or(DEFAULT_FILE_MODE);
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                entries.push(ArchiveEntry::File {
                    path,
                    content,
                    mode,
                });
            }
            _ => {}
        }
    }

    Ok(entries)
}

/// Unpack an archive under `dest`. Members escaping `dest` are rejected by `tar`.
pub fn unpack_to_dir(bytes: &[u8], dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(decoder(bytes));
    archive.set_overwrite(true);
    archive.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/components")).unwrap();
        std::fs::write(dir.path().join("package.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("src/App.tsx"), b"export default 1").unwrap();
        std::fs::write(dir.path().join("src/components/B.tsx"), b"b").unwrap();
        std::fs::write(dir.path().join("App.txt"), b"v1").unwrap();
        dir
    }

    #[test]
    fn test_entry_order_is_sorted_and_deterministic() {
        let tree = sample_tree();
        let first = read_entries(&pack_dir(tree.path(), Compression::None, Vec::new()).unwrap()).unwrap();
        let second = read_entries(&pack_dir(tree.path(), Compression::None, Vec::new()).unwrap()).unwrap();

        let paths: Vec<&str> = first.iter().map(|e| e.path()).collect();
        assert_eq!(
            paths,
            vec![
                "App.txt",
                "package.json",
                "src",
                "src/App.tsx",
                "src/components",
                "src/components/B.tsx",
            ]
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_gzip_archive_is_detected_on_read() {
        let tree = sample_tree();
        let bytes = pack_dir(tree.path(), Compression::Gzip, Vec::new()).unwrap();
        assert!(bytes.starts_with(&GZIP_MAGIC));

        let entries = read_entries(&bytes).unwrap();
        let app = entries
            .iter()
            .find(|e| e.path() == "App.txt")
            .expect("App.txt in archive");
        match app {
            ArchiveEntry::File { content, .. } => assert_eq!(content, b"v1"),
            other => panic!("expected a file entry, got {:?}", other),
        }
    }

    #[test]
    fn test_unpack_to_dir_overwrites_existing_files() {
        let tree = sample_tree();
        let bytes = pack_dir(tree.path(), Compression::None, Vec::new()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        std::fs::write(dest.path().join("App.txt"), b"stale").unwrap();
        unpack_to_dir(&bytes, dest.path()).unwrap();

        assert_eq!(std::fs::read(dest.path().join("App.txt")).unwrap(), b"v1");
        assert_eq!(
            std::fs::read(dest.path().join("src/components/B.tsx")).unwrap(),
            b"b"
        );
    }

    #[test]
    fn test_tempfile_spool_is_removed_on_drop() {
        let tree = sample_tree();
        let spool_dir = tempfile::tempdir().unwrap();
        let spool = pack_dir_to_tempfile(tree.path(), Compression::None, spool_dir.path()).unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        drop(spool);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_tree_packs_to_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = pack_dir(dir.path(), Compression::None, Vec::new()).unwrap();
        assert!(read_entries(&bytes).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_bits_survive_packing() {
        use std::os::unix::fs::PermissionsExt;

        let tree = sample_tree();
        let script = tree.path().join("start.sh");
        std::fs::write(&script, b"#!/bin/sh\nnpm run dev\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let bytes = pack_dir(tree.path(), Compression::None, Vec::new()).unwrap();
        let entries = read_entries(&bytes).unwrap();
        let mode_of = |name: &str| {
            entries.iter().find_map(|e| match e {
                ArchiveEntry::File { path, mode, .. } if path == name => Some(*mode),
                _ => None,
            })
        };
        assert_eq!(mode_of("start.sh"), Some(0o755));

        let dest = tempfile::tempdir().unwrap();
        unpack_to_dir(&bytes, dest.path()).unwrap();
        let unpacked = std::fs::metadata(dest.path().join("start.sh")).unwrap();
        assert_eq!(unpacked.permissions().mode() & 0o111, 0o111);
    }
}
