// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Add-on backup archives.
//!
//! Layout of the tar file:
//! - `addon.json`: [`BackupMetadata`]
//! - `image.tar`: exported image, only for locally built add-ons
//! - `data/`: the add-on's data directory
//!
//! Everything here is blocking file I/O and runs on the blocking pool.

use crate::domain::addon::{AddonConfig, AddonPersist, AddonState};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

pub const METADATA_FILE: &str = "addon.json";
pub const IMAGE_FILE: &str = "image.tar";
pub const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub slug: String,
    pub version: String,
    pub user: AddonPersist,
    pub system: AddonConfig,
    /// State at backup time; a started add-on is started again on restore.
    pub state: AddonState,
}

/// Compiles `backup_exclude` globs, matched against paths relative to the
/// data directory. Wildcards never cross a `/`; a pattern naming a directory
/// also excludes everything below it.
pub fn exclude_patterns(globs: &[String]) -> Result<GlobSet, globset::Error> {
    globs
        .iter()
        .map(|glob| glob.trim_start_matches("./").trim_end_matches('/'))
        .flat_map(|glob| [glob.to_string(), format!("{}/**", glob)])
        .map(|glob| GlobBuilder::new(&glob).literal_separator(true).build())
        .try_fold(GlobSetBuilder::new(), |mut builder, glob| {
            builder.add(glob?);
            Ok::<_, globset::Error>(builder)
        })?
        .build()
}

fn excluded(relative: &Path, patterns: &GlobSet) -> bool {
    patterns.is_match(relative)
}

pub fn write_archive(
    target: &Path,
    metadata: &BackupMetadata,
    image: Option<&Path>,
    data_dir: &Path,
    exclude: &GlobSet,
) -> io::Result<()> {
    let file = File::create(target)?;
    let mut archive = tar::Builder::new(file);

    let json = serde_json::to_vec_pretty(metadata)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(json.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    archive.append_data(&mut header, METADATA_FILE, json.as_slice())?;

    if let Some(image) = image {
        archive.append_path_with_name(image, IMAGE_FILE)?;
    }

    if data_dir.is_dir() {
        for entry in WalkDir::new(data_dir).min_depth(1).follow_links(false) {
            let entry = entry.map_err(io::Error::other)?;
            let relative = entry.path().strip_prefix(data_dir).map_err(io::Error::other)?;
            if excluded(relative, exclude) {
                continue;
            }
            let name = Path::new(DATA_DIR).join(relative);
            if entry.file_type().is_dir() {
                archive.append_dir(&name, entry.path())?;
            } else if entry.file_type().is_file() {
                archive.append_path_with_name(entry.path(), &name)?;
            }
        }
    }

    archive.into_inner()?.sync_all()
}

pub fn unpack_archive(source: &Path, target: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(File::open(source)?);
    archive.unpack(target)
}

/// Reads only the metadata entry of an archive.
pub fn read_metadata(source: &Path) -> io::Result<BackupMetadata> {
    let mut archive = tar::Archive::new(File::open(source)?);
    for entry in archive.entries()? {
        let entry = entry?;
        let is_metadata = entry.path()? == Path::new(METADATA_FILE);
        if is_metadata {
            return serde_json::from_reader(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} has no {}", source.display(), METADATA_FILE),
    ))
}

pub fn read_metadata_file(path: &Path) -> io::Result<BackupMetadata> {
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Replaces `target` with a copy of `source`. A missing `source` leaves an
/// empty `target`.
pub fn replace_tree(source: &Path, target: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(target)?;
    if !source.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> BackupMetadata {
        let system: AddonConfig = serde_yaml::from_str("name: SSH\nslug: local_ssh\nversion: 9.2.1\n").unwrap();
        BackupMetadata {
            slug: "local_ssh".into(),
            version: "9.2.1".into(),
            user: AddonPersist::for_install(&system, "amd64"),
            system,
            state: AddonState::Started,
        }
    }

    #[test]
    fn test_exclude_patterns() {
        let patterns = exclude_patterns(&["*.log".into(), "cache".into()]).unwrap();
        assert!(excluded(Path::new("debug.log"), &patterns));
        assert!(excluded(Path::new("cache/blob"), &patterns));
        assert!(!excluded(Path::new("options.json"), &patterns));
    }

    #[test]
    fn test_exclude_classes_and_separators() {
        let patterns = exclude_patterns(&["cache[0-9]".into(), "log?.txt".into(), "tmp/*.db".into()]).unwrap();
        assert!(excluded(Path::new("cache1"), &patterns));
        assert!(excluded(Path::new("cache7/blob"), &patterns));
        assert!(!excluded(Path::new("cachex"), &patterns));
        assert!(excluded(Path::new("log1.txt"), &patterns));
        assert!(!excluded(Path::new("log/.txt"), &patterns));
        assert!(excluded(Path::new("tmp/state.db"), &patterns));
        assert!(!excluded(Path::new("tmp/nested/state.db"), &patterns));
    }

    #[test]
    fn test_archive_contents() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(data.join("keys")).unwrap();
        std::fs::write(data.join("keys/host_key"), "secret").unwrap();
        std::fs::write(data.join("debug.log"), "noise").unwrap();

        let archive = dir.path().join("backup.tar");
        let patterns = exclude_patterns(&["*.log".into()]).unwrap();
        let metadata = metadata();
        write_archive(&archive, &metadata, None, &data, &patterns).unwrap();

        assert_eq!(read_metadata(&archive).unwrap(), metadata);

        let unpacked = dir.path().join("unpacked");
        unpack_archive(&archive, &unpacked).unwrap();
        assert_eq!(
            std::fs::read_to_string(unpacked.join("data/keys/host_key")).unwrap(),
            "secret"
        );
        assert!(!unpacked.join("data/debug.log").exists());
        assert!(!unpacked.join(IMAGE_FILE).exists());
    }

    #[test]
    fn test_replace_tree_deletes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(source.join("options.json"), "{}").unwrap();
        std::fs::write(target.join("stale"), "old").unwrap();

        replace_tree(&source, &target).unwrap();
        assert!(target.join("options.json").exists());
        assert!(!target.join("stale").exists());
    }
}
