//! Partition stored files into size-bounded zip bundles.
//!
//! Packing is first-fit decreasing: a heuristic, not an optimal packing, so
//! callers must not assume a minimal bundle count.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{errors::Error, storage::FileEntry, Result};

pub const DEFAULT_PART_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Size cap of one bundle (sum of the raw file sizes).
    pub part_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            part_bytes: DEFAULT_PART_BYTES,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub files: Vec<PathBuf>,
    pub total_size: u64,
}

/// Pack `files` into partitions of at most `cap` bytes.
///
/// A file larger than `cap` gets a partition of its own.
pub fn partition(files: impl IntoIterator<Item = FileEntry>, cap: u64) -> Vec<Partition> {
    let mut files: Vec<FileEntry> = files.into_iter().collect();
    files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    let mut parts: Vec<Partition> = Vec::new();
    for file in files {
        let slot = parts
            .iter_mut()
            .find(|p| p.total_size.saturating_add(file.size) <= cap);
        match slot {
            Some(p) => {
                p.total_size += file.size;
                p.files.push(file.path);
            }
            None => parts.push(Partition {
                files: vec![file.path],
                total_size: file.size,
            }),
        }
    }
    parts
}

/// Name of the `index`-th (1-based) bundle.
pub fn bundle_name(index: usize) -> String {
    format!("shonklib_part_{index}.zip")
}

/// Write one deflated zip per partition into `out_dir`.
///
/// Entry names are relative to `root`. Returns bundle paths in partition order.
pub fn export_partitions(root: &Path, parts: &[Partition], out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut bundles = Vec::with_capacity(parts.len());

    for (i, part) in parts.iter().enumerate() {
        let bundle = out_dir.join(bundle_name(i + 1));
        let mut zw = ZipWriter::new(fs::File::create(&bundle)?);

        for path in &part.files {
            zw.start_file(entry_name(root, path), options)
                .map_err(zip_err)?;
            let mut src = fs::File::open(path)?;
            io::copy(&mut src, &mut zw)?;
        }

        let mut out = zw.finish().map_err(zip_err)?;
        out.flush()?;
        tracing::debug!(bundle = %bundle.display(), files = part.files.len(), bytes = part.total_size, "archive bundle written");
        bundles.push(bundle);
    }

    Ok(bundles)
}

fn entry_name(root: &Path, path: &Path) -> String {
    let rel = path
        .strip_prefix(root)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| path.file_name().map(PathBuf::from))
        .unwrap_or_else(|| path.to_path_buf());
    rel.to_string_lossy().replace('\\', "/")
}

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::External(format!("zip error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const MIB: u64 = 1024 * 1024;

    fn sizes(parts: &[Partition]) -> Vec<u64> {
        parts.iter().map(|p| p.total_size).collect()
    }

    #[test]
    fn first_fit_decreasing_fills_earlier_bins() {
        let parts = partition(
            vec![
                FileEntry::new("c", 3 * MIB),
                FileEntry::new("a", 5 * MIB),
                FileEntry::new("b", 5 * MIB),
            ],
            8 * MIB,
        );

        assert_eq!(parts.len(), 2);
        assert_eq!(sizes(&parts), vec![8 * MIB, 5 * MIB]);
        assert_eq!(parts[0].files, vec![PathBuf::from("a"), PathBuf::from("c")]);
        assert_eq!(parts[1].files, vec![PathBuf::from("b")]);
    }

    #[test]
    fn oversized_file_gets_its_own_partition() {
        let parts = partition(vec![FileEntry::new("huge", 10 * MIB)], 8 * MIB);
        assert_eq!(
            parts,
            vec![Partition {
                files: vec![PathBuf::from("huge")],
                total_size: 10 * MIB,
            }]
        );

        let parts = partition(
            vec![FileEntry::new("huge", 10 * MIB), FileEntry::new("small", MIB)],
            8 * MIB,
        );
        assert_eq!(sizes(&parts), vec![10 * MIB, MIB]);
    }

    #[test]
    fn multi_file_partitions_respect_cap() {
        let files: Vec<FileEntry> = (0..40u64)
            .map(|i| FileEntry::new(format!("f{i:02}"), (i * 7919) % (3 * MIB) + 1))
            .collect();
        for p in partition(files, 8 * MIB) {
            if p.files.len() > 1 {
                assert!(p.total_size <= 8 * MIB);
            }
        }
    }

    #[test]
    fn equal_sizes_are_ordered_by_path() {
        let parts = partition(
            vec![
                FileEntry::new("z", 4),
                FileEntry::new("m", 4),
                FileEntry::new("a", 4),
            ],
            8,
        );
        assert_eq!(parts[0].files, vec![PathBuf::from("a"), PathBuf::from("m")]);
        assert_eq!(parts[1].files, vec![PathBuf::from("z")]);
    }

    #[test]
    fn empty_input_has_no_partitions() {
        assert!(partition(Vec::new(), 8).is_empty());
    }

    #[test]
    fn exports_one_zip_per_partition_with_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("storage");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.png"), vec![1u8; 6]).unwrap();
        fs::write(root.join("sub/b.png"), vec![2u8; 5]).unwrap();
        fs::write(root.join("c.png"), vec![3u8; 3]).unwrap();

        let files = vec![
            FileEntry::new(root.join("a.png"), 6),
            FileEntry::new(root.join("sub/b.png"), 5),
            FileEntry::new(root.join("c.png"), 3),
        ];
        let parts = partition(files, 9);
        assert_eq!(sizes(&parts), vec![9, 5]);

        let out = dir.path().join("export");
        let bundles = export_partitions(&root, &parts, &out).unwrap();
        assert_eq!(
            bundles,
            vec![out.join("shonklib_part_1.zip"), out.join("shonklib_part_2.zip")]
        );

        let mut first = zip::ZipArchive::new(fs::File::open(&bundles[0]).unwrap()).unwrap();
        assert_eq!(first.len(), 2);
        let mut buf = Vec::new();
        first.by_name("a.png").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1u8; 6]);
        assert!(first.by_name("c.png").is_ok());

        let mut second = zip::ZipArchive::new(fs::File::open(&bundles[1]).unwrap()).unwrap();
        assert!(second.by_name("sub/b.png").is_ok());
    }
}
