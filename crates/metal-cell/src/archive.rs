//! Config working-tree commit and archive.
//!
//! The cell's rendered configs are committed into a throwaway git
//! repository (single commit, fixed author) and the whole working tree is
//! archived as a `.tar.gz`. The archive is the cell's durable config
//! record; the repository exists so a future operator can diff against it.

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use git2::{Repository, Signature};

use crate::error::{CellError, CellResult};

const COMMIT_AUTHOR_NAME: &str = "metal";
const COMMIT_AUTHOR_EMAIL: &str = "robots@metal.internal";

/// Commit every file under `dir` into a fresh git repository and return the
/// gzipped tarball of the working tree.
pub fn commit_and_archive(dir: &Path) -> CellResult<Vec<u8>> {
    commit_all(dir)?;
    archive_tree(dir)
}

fn commit_all(dir: &Path) -> CellResult<()> {
    let repo = Repository::init(dir).map_err(|e| CellError::Archive(e.to_string()))?;
    let mut index = repo.index().map_err(|e| CellError::Archive(e.to_string()))?;
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .map_err(|e| CellError::Archive(e.to_string()))?;
    index.write().map_err(|e| CellError::Archive(e.to_string()))?;

    let tree_id = index
        .write_tree()
        .map_err(|e| CellError::Archive(e.to_string()))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|e| CellError::Archive(e.to_string()))?;
    let author = Signature::now(COMMIT_AUTHOR_NAME, COMMIT_AUTHOR_EMAIL)
        .map_err(|e| CellError::Archive(e.to_string()))?;
    repo.commit(
        Some("HEAD"),
        &author,
        &author,
        "cluster config",
        &tree,
        &[],
    )
    .map_err(|e| CellError::Archive(e.to_string()))?;
    Ok(())
}

fn archive_tree(dir: &Path) -> CellResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| CellError::Archive(e.to_string()))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| CellError::Archive(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CellError::Archive(e.to_string()))
}

/// Unpack a `.tar.gz` produced by [`commit_and_archive`] into `dest`.
pub fn unpack_archive(archive: &[u8], dest: &Path) -> CellResult<()> {
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(dest)
        .map_err(|e| CellError::Archive(e.to_string()))?;
    Ok(())
}
