//! Zip packaging of the `build/` directory.
//!
//! Only regular files directly inside the source directory are packed,
//! sorted by name and stored under their bare file names. The archive is
//! streamed into `{output}.part` and renamed into place once complete.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("source directory {0} does not exist")]
    SourceMissing(String),

    #[error("i/o error while packaging: {0}")]
    Io(#[from] io::Error),

    #[error("zip error while packaging: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Removes the temporary archive unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Regular files directly inside `dir`, sorted by file name.
fn regular_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, PackagingError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, entry.path()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(unix)]
fn file_options(path: &Path) -> Result<SimpleFileOptions, PackagingError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode & 0o777))
}

#[cfg(not(unix))]
fn file_options(_path: &Path) -> Result<SimpleFileOptions, PackagingError> {
    Ok(SimpleFileOptions::default().compression_method(CompressionMethod::Deflated))
}

/// Pack every regular file of `source` into the zip archive `output`.
///
/// Blocking; run it on the blocking pool.
pub fn package_directory(source: &Path, output: &Path) -> Result<PathBuf, PackagingError> {
    if !source.is_dir() {
        return Err(PackagingError::SourceMissing(source.display().to_string()));
    }
    let files = regular_files(source)?;

    let mut partial_name = output.as_os_str().to_owned();
    partial_name.push(".part");
    let mut partial = PartialFile {
        path: PathBuf::from(partial_name),
        armed: true,
    };

    let mut zip = ZipWriter::new(BufWriter::new(File::create(&partial.path)?));
    for (name, path) in &files {
        zip.start_file(name.as_str(), file_options(path)?)?;
        let mut reader = File::open(path)?;
        io::copy(&mut reader, &mut zip)?;
    }
    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer)?;
    drop(writer);

    fs::rename(&partial.path, output)?;
    partial.armed = false;

    tracing::debug!(
        source = %source.display(),
        artifact = %output.display(),
        files = files.len(),
        "Packaged build output"
    );
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn read_entries(archive: &Path) -> Vec<(String, Vec<u8>)> {
        let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).unwrap();
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).unwrap();
            entries.push((file.name().to_string(), bytes));
        }
        entries
    }

    #[test]
    fn packs_each_file_restorable_byte_for_byte() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("build");
        fs::create_dir(&source).unwrap();
        let binary: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::write(source.join("b.bin"), &binary).unwrap();
        fs::write(source.join("a.txt"), b"hello artifact\n").unwrap();

        let output = tmp.path().join("app.zip");
        let artifact = package_directory(&source, &output).unwrap();

        assert_eq!(artifact, output);
        assert_eq!(
            read_entries(&artifact),
            vec![
                ("a.txt".to_string(), b"hello artifact\n".to_vec()),
                ("b.bin".to_string(), binary),
            ]
        );
        assert!(!tmp.path().join("app.zip.part").exists());
    }

    #[test]
    fn nested_directories_are_not_descended() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("build");
        fs::create_dir_all(source.join("assets")).unwrap();
        fs::write(source.join("assets").join("logo.png"), b"png").unwrap();
        fs::write(source.join("app"), b"bin").unwrap();

        let output = tmp.path().join("out.zip");
        package_directory(&source, &output).unwrap();

        let names: Vec<String> = read_entries(&output).into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["app"]);
    }

    #[cfg(unix)]
    #[test]
    fn preserves_executable_bit() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("build");
        fs::create_dir(&source).unwrap();
        let bin = source.join("server");
        fs::write(&bin, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        let output = tmp.path().join("out.zip");
        package_directory(&source, &output).unwrap();

        let mut zip = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        let entry = zip.by_name("server").unwrap();
        assert_eq!(entry.unix_mode().unwrap() & 0o777, 0o755);
    }

    #[test]
    fn failure_leaves_no_artifact_behind() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("build");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a.txt"), b"a").unwrap();

        // the output directory does not exist, so creating the archive fails
        let output = tmp.path().join("missing").join("out.zip");
        assert!(matches!(
            package_directory(&source, &output),
            Err(PackagingError::Io(_))
        ));
        assert!(!output.exists());

        let err = package_directory(&tmp.path().join("nope"), &tmp.path().join("x.zip"));
        assert!(matches!(err, Err(PackagingError::SourceMissing(_))));
        assert!(!tmp.path().join("x.zip").exists());
    }
}
