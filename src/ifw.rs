//! Obtaining the installer-framework tools that contain `repogen`.
//!
//! The tools come as a local directory, a local archive or an archive URL.
//! Archives are unpacked once under `<work_dir>/ifw_tools`; a later run reuses
//! the unpacked tree.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::platform::PlatformInfo;
use crate::resolver::is_absolute_url;
use crate::runner::run_checked;

pub const IFW_TOOLS_DIR_NAME: &str = "ifw_tools";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Tool root (the directory containing `bin/repogen`) for `uri`.
pub fn prepare_ifw_tools(uri: &str, work_dir: &Path, platform: &PlatformInfo) -> Result<PathBuf> {
    info!("Preparing ifw tools: {}", uri);
    let local = Path::new(uri);
    if local.is_dir() {
        return locate_repogen(local, platform);
    }

    let tools_dir = work_dir.join(IFW_TOOLS_DIR_NAME);
    if tools_dir.is_dir() {
        info!("reusing unpacked ifw tools: {}", tools_dir.display());
        return locate_repogen(&tools_dir, platform);
    }
    if !local.is_file() && !is_absolute_url(uri) {
        return Err(Error::configuration(format!(
            "ifw tools is neither a directory, a file nor an URL: {}",
            uri
        )));
    }
    fs::create_dir_all(&tools_dir).map_err(|e| Error::path(&tools_dir, e))?;

    let unpacked = fetch_and_extract(uri, local, &tools_dir).and_then(|_| locate_repogen(&tools_dir, platform));
    if unpacked.is_err() {
        let _ = fs::remove_dir_all(&tools_dir);
    }
    unpacked
}

fn fetch_and_extract(uri: &str, local: &Path, tools_dir: &Path) -> Result<()> {
    let archive = if local.is_file() {
        local.to_path_buf()
    } else {
        download_archive(uri, tools_dir)?
    };
    extract_archive(&archive, tools_dir)
}

/// Download `url` into `dest_dir`, keeping the last path segment as file name.
pub fn download_archive(url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::configuration(format!("no file name in url: {}", url)))?;
    let dest = dest_dir.join(name);
    info!("downloading {} -> {}", url, dest.display());

    let http = |source| Error::Http {
        url: url.to_string(),
        source,
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(http)?;
    let mut response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(http)?;
    let mut file = fs::File::create(&dest).map_err(|e| Error::path(&dest, e))?;
    io::copy(&mut response, &mut file).map_err(|e| Error::path(&dest, e))?;
    Ok(dest)
}

/// Compression wrapped around a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TarCompression {
    None,
    Gzip,
    Xz,
    Bzip2,
    Zstd,
}

fn tar_compression(name: &str) -> Option<TarCompression> {
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(TarCompression::Gzip)
    } else if name.ends_with(".tar.xz") {
        Some(TarCompression::Xz)
    } else if name.ends_with(".tar.bz2") {
        Some(TarCompression::Bzip2)
    } else if name.ends_with(".tar.zst") {
        Some(TarCompression::Zstd)
    } else if name.ends_with(".tar") {
        Some(TarCompression::None)
    } else {
        None
    }
}

/// Unpack `archive` into `dest_dir`.
///
/// Tar archives are unpacked in-process; `.7z` and `.zip` go through `7z`.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    info!("extracting {} -> {}", archive.display(), dest_dir.display());

    if let Some(compression) = tar_compression(&name) {
        return unpack_tar(archive, compression, dest_dir);
    }
    if name.ends_with(".7z") || name.ends_with(".zip") {
        let args = vec![
            "x".to_string(),
            "-y".to_string(),
            format!("-o{}", dest_dir.to_string_lossy()),
            archive.to_string_lossy().into_owned(),
        ];
        run_checked("7z", &args, None, Some(EXTRACT_TIMEOUT))?;
        return Ok(());
    }
    Err(Error::configuration(format!(
        "unsupported ifw tools archive: {}",
        archive.display()
    )))
}

fn unpack_tar(archive: &Path, compression: TarCompression, dest_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive).map_err(|e| Error::path(archive, e))?;
    let reader: Box<dyn Read> = match compression {
        TarCompression::None => Box::new(file),
        TarCompression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        TarCompression::Xz => Box::new(xz2::read::XzDecoder::new(file)),
        TarCompression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        TarCompression::Zstd => {
            Box::new(zstd::stream::Decoder::new(file).map_err(|e| Error::path(archive, e))?)
        }
    };
    tar::Archive::new(reader)
        .unpack(dest_dir)
        .map_err(|e| Error::path(archive, e))
}

/// Find `repogen` below `root` and return the directory holding its `bin`.
pub fn locate_repogen(root: &Path, platform: &PlatformInfo) -> Result<PathBuf> {
    let wanted = platform.executable_name("repogen");
    let found = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name().to_string_lossy() == wanted)
        .ok_or_else(|| {
            Error::configuration(format!("{} not found under {}", wanted, root.display()))
        })?;

    let bin_dir = found.path().parent();
    match bin_dir.and_then(Path::parent) {
        Some(tool_root) => Ok(tool_root.to_path_buf()),
        None => Err(Error::configuration(format!(
            "{} has no parent tool directory",
            found.path().display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OsFamily;
    use tempfile::TempDir;

    fn linux() -> PlatformInfo {
        PlatformInfo::new(OsFamily::Linux, None)
    }

    #[test]
    fn test_locate_repogen() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("Tools/QtInstallerFramework/4.5/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("repogen"), "").unwrap();

        assert_eq!(
            locate_repogen(temp.path(), &linux()).unwrap(),
            temp.path().join("Tools/QtInstallerFramework/4.5")
        );
        let windows = PlatformInfo::new(OsFamily::Windows, None);
        assert!(matches!(
            locate_repogen(temp.path(), &windows),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_local_directory_used_as_is() {
        let temp = TempDir::new().unwrap();
        let tools = temp.path().join("ifw");
        fs::create_dir_all(tools.join("bin")).unwrap();
        fs::write(tools.join("bin/repogen"), "").unwrap();

        let work = temp.path().join("work");
        assert_eq!(prepare_ifw_tools(&tools.to_string_lossy(), &work, &linux()).unwrap(), tools);
        assert!(!work.exists());
    }

    #[test]
    fn test_rejects_unknown_source() {
        let temp = TempDir::new().unwrap();
        let result = prepare_ifw_tools("not/there.7z", temp.path(), &linux());
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(!temp.path().join(IFW_TOOLS_DIR_NAME).exists());
    }

    #[test]
    fn test_unsupported_archive() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("tools.rar");
        fs::write(&archive, "").unwrap();
        assert!(matches!(
            extract_archive(&archive, temp.path()),
            Err(Error::Configuration(_))
        ));
    }

    fn write_tar_gz(archive: &Path, files: &[(&str, &[u8])]) {
        let encoder = flate2::write::GzEncoder::new(
            fs::File::create(archive).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_extracts_tar_archive_once() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("ifw.tar.gz");
        write_tar_gz(&archive, &[("ifw/bin/repogen", &b"#!/bin/sh\n"[..])]);

        let work = temp.path().join("work");
        let root = prepare_ifw_tools(&archive.to_string_lossy(), &work, &linux()).unwrap();
        assert_eq!(root, work.join("ifw_tools/ifw"));
        assert!(root.join("bin/repogen").is_file());

        fs::remove_file(&archive).unwrap();
        assert_eq!(prepare_ifw_tools(&archive.to_string_lossy(), &work, &linux()).unwrap(), root);
    }

    #[test]
    fn test_extracts_plain_tar() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("tools.tar");
        let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
        let data = b"x";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, "bin/repogen", &data[..]).unwrap();
        builder.finish().unwrap();

        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        extract_archive(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("bin/repogen")).unwrap(), b"x");
    }

    #[test]
    fn test_tar_compression_by_name() {
        assert_eq!(tar_compression("a.tgz"), Some(TarCompression::Gzip));
        assert_eq!(tar_compression("a.tar.bz2"), Some(TarCompression::Bzip2));
        assert_eq!(tar_compression("a.tar.xz"), Some(TarCompression::Xz));
        assert_eq!(tar_compression("a.tar"), Some(TarCompression::None));
        assert_eq!(tar_compression("a.7z"), None);
    }
}
