//! Turns the contents of a job's work directory into one deliverable file.

use std::path::{Path, PathBuf};

use async_zip::{Compression, ZipEntryBuilder, tokio::write::ZipFileWriter};
use thiserror::Error;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("no playlist directory was created")]
    NoPlaylistDir,

    #[error("the download produced no file")]
    NoOutputFile,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] async_zip::error::ZipError),
}

pub type Result<T> = std::result::Result<T, FinalizeError>;

/// The file handed to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalArtifact {
    pub path: PathBuf,
    pub name: String,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Lists the visible top-level entries of `dir` matching `want_dir`, sorted by name
async fn top_level_entries(dir: &Path, want_dir: bool) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        let file_type = entry.file_type().await?;
        let matches = if want_dir {
            file_type.is_dir()
        } else {
            file_type.is_file()
        };
        if matches {
            entries.push((name, entry.path()));
        }
    }
    entries.sort();
    Ok(entries)
}

/// A single download leaves exactly one media file behind
pub async fn single_output(work_dir: &Path) -> Result<FinalArtifact> {
    let files = top_level_entries(work_dir, false).await?;
    if files.len() > 1 {
        debug!(count = files.len(), "More than one output file, using the first");
    }
    let (name, path) = files.into_iter().next().ok_or(FinalizeError::NoOutputFile)?;
    Ok(FinalArtifact { path, name })
}

/// Every file below `dir`, sorted. Any entry that can't be read fails the walk.
fn playlist_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in jwalk::WalkDir::new(dir).sort(true) {
        let mut entry = entry.map_err(std::io::Error::from)?;
        if let Some(e) = entry.read_children_error.take() {
            return Err(std::io::Error::from(e).into());
        }
        if entry.file_type().is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Zips the playlist directory into `<playlist>.zip` next to it.
///
/// Entry names are relative to the work directory, so the archive unpacks to
/// a single folder named after the playlist.
pub async fn archive_playlist(work_dir: &Path) -> Result<FinalArtifact> {
    let dirs = top_level_entries(work_dir, true).await?;
    let (dir_name, playlist_dir) = dirs.into_iter().next().ok_or(FinalizeError::NoPlaylistDir)?;

    let files = playlist_files(&playlist_dir)?;

    let name = format!("{dir_name}.zip");
    let archive_path = work_dir.join(&name);
    info!(archive = ?archive_path, files = files.len(), "Archiving playlist");

    let archive = tokio::fs::File::create(&archive_path).await?;
    let mut writer = ZipFileWriter::with_tokio(archive);

    for path in &files {
        let Ok(relative) = path.strip_prefix(work_dir) else {
            continue;
        };
        let entry_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let builder = ZipEntryBuilder::new(entry_name.clone().into(), Compression::Deflate);
        let mut entry_writer = writer.write_entry_stream(builder).await?;
        let mut source = tokio::fs::File::open(path).await?.compat();
        let bytes = futures::io::copy(&mut source, &mut entry_writer).await?;
        entry_writer.close().await?;

        debug!(entry = %entry_name, bytes, "Added to archive");
    }

    writer.close().await?;

    Ok(FinalArtifact {
        path: archive_path,
        name,
    })
}
