//! Source tree packing.

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Directories never shipped in a source upload.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// Pack a source directory into a gzipped tarball, skipping VCS and build
/// output directories.
pub fn pack(dir: &Path) -> std::io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    add_dir(&mut builder, dir, Path::new(""))?;

    builder.into_inner()?.finish()
}

fn add_dir<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    relative: &Path,
) -> std::io::Result<()> {
    let mut entries: Vec<_> =
        std::fs::read_dir(root.join(relative))?.collect::<Result<_, _>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name();
        let child = relative.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            builder.append_dir(&child, entry.path())?;
            add_dir(builder, root, &child)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(entry.path(), &child)?;
        }
        // Symlinks and special files are skipped.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn unpack(archive: &[u8], dest: &Path) {
        let decoder = flate2::read::GzDecoder::new(archive);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(dest).expect("unpack");
    }

    #[test]
    fn packs_files_and_skips_vcs_dirs() {
        let src = tempfile::tempdir().expect("tempdir");
        fs::write(src.path().join("main.rs"), "fn main() {}\n").expect("write");
        fs::create_dir(src.path().join("src")).expect("mkdir");
        fs::write(src.path().join("src/lib.rs"), "pub fn lib() {}\n").expect("write");
        fs::create_dir(src.path().join(".git")).expect("mkdir");
        fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main\n").expect("write");
        fs::create_dir(src.path().join("target")).expect("mkdir");
        fs::write(src.path().join("target/junk"), "junk").expect("write");

        let archive = pack(src.path()).expect("pack");

        let dest = tempfile::tempdir().expect("tempdir");
        unpack(&archive, dest.path());

        assert!(dest.path().join("main.rs").exists());
        assert!(dest.path().join("src/lib.rs").exists());
        assert!(!dest.path().join(".git").exists());
        assert!(!dest.path().join("target").exists());
    }

    #[test]
    fn round_trip_preserves_contents() {
        let src = tempfile::tempdir().expect("tempdir");
        let content = "x".repeat(100_000);
        fs::write(src.path().join("big.txt"), &content).expect("write");

        let archive = pack(src.path()).expect("pack");
        let dest = tempfile::tempdir().expect("tempdir");
        unpack(&archive, dest.path());

        let restored = fs::read_to_string(dest.path().join("big.txt")).expect("read");
        assert_eq!(restored, content);
    }
}
