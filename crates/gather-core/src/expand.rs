//! Archive expansion applied to gathered files.

use std::io::{Read, Write};
use std::path::{Component, Path};

use anyhow::Context;

/// Unpacks an archive file into a directory.
pub trait Expander: Send + Sync {
    fn expand(&self, archive: &Path, destination: &Path) -> anyhow::Result<()>;
}

/// Zip archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExpander;

/// Compression wrapped around a tar stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
}

/// Tar archives, optionally gzip or bzip2 compressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarExpander {
    compression: Compression,
}

impl TarExpander {
    pub const fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

/// A single bzip2-compressed file, decompressed to
/// `<destination>/<archive stem>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bzip2Expander;

static ZIP: ZipExpander = ZipExpander;
static TAR: TarExpander = TarExpander::new(Compression::None);
static TAR_GZ: TarExpander = TarExpander::new(Compression::Gzip);
static TAR_BZ2: TarExpander = TarExpander::new(Compression::Bzip2);
static BZIP2: Bzip2Expander = Bzip2Expander;

/// Compound extensions checked before the final one.
const COMPOUND_EXTENSIONS: &[&str] = &["tar.gz", "tar.bz2"];

/// Look up the expander for a file extension, with or without the leading
/// dot: `zip`, `tar`, `tar.gz`/`tgz`, `tar.bz2`/`tbz2`, `bz2`.
pub fn expander_for(extension: &str) -> Option<&'static dyn Expander> {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "zip" => Some(&ZIP),
        "tar" => Some(&TAR),
        "tar.gz" | "tgz" => Some(&TAR_GZ),
        "tar.bz2" | "tbz2" | "tbz" => Some(&TAR_BZ2),
        "bz2" => Some(&BZIP2),
        _ => None,
    }
}

/// Look up the expander for `path` by its extension.
pub fn expander_for_path(path: &Path) -> Option<&'static dyn Expander> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    COMPOUND_EXTENSIONS
        .iter()
        .find(|ext| name.ends_with(&format!(".{}", ext)))
        .and_then(|ext| expander_for(ext))
        .or_else(|| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .and_then(expander_for)
        })
}

impl Expander for ZipExpander {
    fn expand(&self, archive: &Path, destination: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::open(archive)
            .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read zip archive: {}", archive.display()))?;

        std::fs::create_dir_all(destination).with_context(|| {
            format!("Failed to create extract directory: {}", destination.display())
        })?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read zip entry {}", i))?;

            let Some(relative) = entry.enclosed_name() else {
                anyhow::bail!("Zip entry escapes the destination: {}", entry.name());
            };
            let outpath = destination.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&outpath).with_context(|| {
                    format!("Failed to create directory: {}", outpath.display())
                })?;
                continue;
            }

            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory: {}", parent.display())
                })?;
            }

            let mut buffer = Vec::new();
            entry
                .read_to_end(&mut buffer)
                .with_context(|| format!("Failed to read zip entry: {}", entry.name()))?;
            let mut outfile = std::fs::File::create(&outpath)
                .with_context(|| format!("Failed to create file: {}", outpath.display()))?;
            outfile
                .write_all(&buffer)
                .with_context(|| format!("Failed to write file: {}", outpath.display()))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    // Permission bits are best effort.
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                        .ok();
                }
            }
        }

        Ok(())
    }
}

impl Expander for TarExpander {
    fn expand(&self, archive: &Path, destination: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::open(archive)
            .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
        let reader = std::io::BufReader::new(file);
        let result = match self.compression {
            Compression::None => unpack_tar(reader, destination),
            Compression::Gzip => unpack_tar(flate2::read::GzDecoder::new(reader), destination),
            Compression::Bzip2 => unpack_tar(bzip2::read::BzDecoder::new(reader), destination),
        };
        result.with_context(|| format!("Failed to expand tar archive: {}", archive.display()))
    }
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> anyhow::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(false);

    std::fs::create_dir_all(destination).with_context(|| {
        format!("Failed to create extract directory: {}", destination.display())
    })?;

    for entry in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let relative = entry.path().context("Invalid tar entry path")?.into_owned();

        let escapes = relative.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            anyhow::bail!("Tar entry escapes the destination: {}", relative.display());
        }

        let entry_type = entry.header().entry_type();
        let outpath = destination.join(&relative);
        match entry_type {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&outpath).with_context(|| {
                    format!("Failed to create directory: {}", outpath.display())
                })?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create parent directory: {}", parent.display())
                    })?;
                }
                entry
                    .unpack(&outpath)
                    .with_context(|| format!("Failed to write file: {}", outpath.display()))?;
            }
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader => {}
            other => {
                anyhow::bail!(
                    "Unsupported tar entry type {:?} at {}",
                    other,
                    relative.display()
                );
            }
        }
    }

    Ok(())
}

impl Expander for Bzip2Expander {
    fn expand(&self, archive: &Path, destination: &Path) -> anyhow::Result<()> {
        let name = archive
            .file_stem()
            .ok_or_else(|| anyhow::anyhow!("Archive has no file name: {}", archive.display()))?;
        let file = std::fs::File::open(archive)
            .with_context(|| format!("Failed to open archive: {}", archive.display()))?;

        std::fs::create_dir_all(destination).with_context(|| {
            format!("Failed to create extract directory: {}", destination.display())
        })?;
        let outpath = destination.join(name);
        let mut decoder = bzip2::read::BzDecoder::new(std::io::BufReader::new(file));
        let mut outfile = std::fs::File::create(&outpath)
            .with_context(|| format!("Failed to create file: {}", outpath.display()))?;
        std::io::copy(&mut decoder, &mut outfile)
            .with_context(|| format!("Failed to decompress {}", archive.display()))?;
        outfile
            .flush()
            .with_context(|| format!("Failed to write file: {}", outpath.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn tar_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// A tar whose single entry carries `name` verbatim, bypassing path checks.
    fn raw_tar_entry(name: &str, entry_type: tar::EntryType, link: Option<&str>) -> Vec<u8> {
        let mut header = tar::Header::new_old();
        let bytes = name.as_bytes();
        header.as_old_mut().name[..bytes.len()].copy_from_slice(bytes);
        header.set_entry_type(entry_type);
        header.set_mode(0o644);
        if let Some(link) = link {
            header.set_link_name(link).unwrap();
        }
        let body: &[u8] = if link.is_some() { b"" } else { b"gotcha" };
        header.set_size(body.len() as u64);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, body).unwrap();
        builder.into_inner().unwrap()
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn bzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn lookup_by_extension() {
        assert!(expander_for("zip").is_some());
        assert!(expander_for(".ZIP").is_some());
        assert!(expander_for("tgz").is_some());
        assert!(expander_for("tar.bz2").is_some());
        assert!(expander_for("bz2").is_some());
        assert!(expander_for("rar").is_none());
        assert!(expander_for_path(Path::new("/tmp/bundle.zip")).is_some());
        assert!(expander_for_path(Path::new("/tmp/bundle.TAR.GZ")).is_some());
        assert!(expander_for_path(Path::new("/tmp/bundle")).is_none());
        assert!(expander_for_path(Path::new("/tmp/bundle.gz")).is_none());
    }

    #[test]
    fn expands_each_tar_flavour() {
        let tmp = TempDir::new().unwrap();
        let plain = tar_bytes(&[("policy/main.rego", "package main"), ("README.md", "hi")]);
        for (name, bytes) in [
            ("bundle.tar", plain.clone()),
            ("bundle.tar.gz", gzip(&plain)),
            ("bundle.tar.bz2", bzip(&plain)),
        ] {
            let archive = tmp.path().join(name);
            std::fs::write(&archive, bytes).unwrap();
            let out = tmp.path().join(format!("out-{}", name));

            expander_for_path(&archive)
                .unwrap()
                .expand(&archive, &out)
                .unwrap();

            assert_eq!(
                std::fs::read_to_string(out.join("policy").join("main.rego")).unwrap(),
                "package main",
                "{name}"
            );
            assert_eq!(std::fs::read_to_string(out.join("README.md")).unwrap(), "hi");
        }
    }

    #[test]
    fn tar_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.tar.gz");
        std::fs::write(
            &archive,
            gzip(&raw_tar_entry("../escaped.txt", tar::EntryType::Regular, None)),
        )
        .unwrap();
        let out = tmp.path().join("out");

        let err = TAR_GZ.expand(&archive, &out).unwrap_err();
        assert!(format!("{err:#}").contains("escapes the destination"), "{err:#}");
        assert!(!tmp.path().join("escaped.txt").exists());
    }

    #[test]
    fn tar_rejects_links() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("link.tar");
        std::fs::write(
            &archive,
            raw_tar_entry("link", tar::EntryType::Symlink, Some("../outside")),
        )
        .unwrap();
        let out = tmp.path().join("out");

        let err = TAR.expand(&archive, &out).unwrap_err();
        assert!(format!("{err:#}").contains("Unsupported tar entry type"), "{err:#}");
        assert!(std::fs::symlink_metadata(out.join("link")).is_err());
    }

    #[test]
    fn decompresses_single_bzip2_file() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("data.json.bz2");
        std::fs::write(&archive, bzip(br#"{"rules":[]}"#)).unwrap();
        let out = tmp.path().join("out");

        expander_for_path(&archive)
            .unwrap()
            .expand(&archive, &out)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(out.join("data.json")).unwrap(),
            r#"{"rules":[]}"#
        );
    }

    #[test]
    fn expands_nested_entries() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("bundle.zip");
        write_zip(
            &archive,
            &[("policy/", ""), ("policy/main.rego", "package main"), ("README.md", "hi")],
        );
        let out = tmp.path().join("out");

        ZipExpander.expand(&archive, &out).unwrap();

        assert_eq!(
            std::fs::read_to_string(out.join("policy").join("main.rego")).unwrap(),
            "package main"
        );
        assert_eq!(std::fs::read_to_string(out.join("README.md")).unwrap(), "hi");
    }

    #[test]
    fn rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("../escaped.txt", "gotcha")]);
        let out = tmp.path().join("out");

        let err = ZipExpander.expand(&archive, &out).unwrap_err();
        assert!(err.to_string().contains("escapes the destination"), "{err}");
        assert!(!tmp.path().join("escaped.txt").exists());
    }

    #[test]
    fn rejects_non_zip_input() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("plain.zip");
        std::fs::write(&archive, "not a zip").unwrap();
        assert!(ZipExpander.expand(&archive, &tmp.path().join("out")).is_err());
    }
}
