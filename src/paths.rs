//! Collision-free target paths for downloaded files.
//!
//! A target is claimed by creating it with `create_new`, so two workers that
//! race for the same name can never both win: the loser sees `AlreadyExists`
//! and moves on to the next index.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::PdcError;

/// Upper bound on the disambiguating suffix.
pub const MAX_COLLISION_INDEX: u32 = 10_000;

/// File name for the `index`-th attempt: `{study}_{name}` first, then
/// `{study}_{stem}_{index}{ext}`.
pub fn candidate_name(pdc_study_id: &str, file_name: &str, index: u32) -> String {
    if index == 0 {
        return format!("{pdc_study_id}_{file_name}");
    }
    let (stem, extension) = split_extension(file_name);
    format!("{pdc_study_id}_{stem}_{index}{extension}")
}

/// Splits at the last dot, ignoring leading dots (`.bashrc` has no
/// extension). The returned extension keeps its dot.
pub fn split_extension(file_name: &str) -> (&str, &str) {
    let leading = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[leading..].rfind('.') {
        Some(pos) => file_name.split_at(leading + pos),
        None => (file_name, ""),
    }
}

/// Replaces path separators and control characters so a remote name cannot
/// leave the output directory.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch == '/' || ch == '\\' || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// An exclusively created, still empty target file.
#[derive(Debug)]
pub struct ClaimedTarget {
    path: Utf8PathBuf,
    file: File,
}

impl ClaimedTarget {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Writes the whole body and hands it to the OS before returning.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), PdcError> {
        self.file
            .write_all(bytes)
            .and_then(|()| self.file.flush())
            .map_err(|err| PdcError::Filesystem(format!("write {}: {err}", self.path)))
    }

    pub fn into_path(self) -> Utf8PathBuf {
        self.path
    }

    /// Removes the claimed file. Used when the task fails after claiming.
    pub fn discard(self) -> Result<(), PdcError> {
        let ClaimedTarget { path, file } = self;
        drop(file);
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PdcError::Filesystem(format!("remove {path}: {err}"))),
        }
    }
}

/// Claims the first free candidate path under `dir`.
pub fn claim_target(
    dir: &Utf8Path,
    pdc_study_id: &str,
    file_name: &str,
) -> Result<ClaimedTarget, PdcError> {
    let study = sanitize_component(pdc_study_id);
    let name = sanitize_component(file_name);

    for index in 0..=MAX_COLLISION_INDEX {
        let path = dir.join(candidate_name(&study, &name, index));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_std_path())
        {
            Ok(file) => return Ok(ClaimedTarget { path, file }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path, "target exists, trying next index");
            }
            Err(err) => {
                return Err(PdcError::Filesystem(format!("create {path}: {err}")));
            }
        }
    }

    Err(PdcError::CollisionExhausted {
        name: candidate_name(&study, &name, 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, dir)
    }

    #[test]
    fn candidate_names() {
        assert_eq!(candidate_name("PDC01", "data.txt", 0), "PDC01_data.txt");
        assert_eq!(candidate_name("PDC01", "data.txt", 1), "PDC01_data_1.txt");
        assert_eq!(
            candidate_name("PDC01", "run.mzML.gz", 3),
            "PDC01_run.mzML_3.gz"
        );
        assert_eq!(candidate_name("PDC01", "README", 2), "PDC01_README_2");
        assert_eq!(candidate_name("PDC01", ".hidden", 1), "PDC01_.hidden_1");
    }

    #[test]
    fn split_extension_matches_last_dot() {
        assert_eq!(split_extension("a.b.c"), ("a.b", ".c"));
        assert_eq!(split_extension("..cfg"), ("..cfg", ""));
        assert_eq!(split_extension("file."), ("file", "."));
        assert_eq!(split_extension(""), ("", ""));
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_component("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_component("a\\b"), "a_b");
        assert_eq!(sanitize_component(".."), "_");
    }

    #[test]
    fn claim_skips_taken_indices() {
        let (_temp, dir) = temp_dir();
        fs::write(dir.join("PDC01_data.txt"), b"a").unwrap();
        fs::write(dir.join("PDC01_data_1.txt"), b"b").unwrap();

        let claimed = claim_target(&dir, "PDC01", "data.txt").unwrap();
        assert_eq!(claimed.path().file_name(), Some("PDC01_data_2.txt"));
    }

    #[test]
    fn claim_never_reuses_a_claimed_path() {
        let (_temp, dir) = temp_dir();
        let first = claim_target(&dir, "PDC01", "data.txt").unwrap();
        let second = claim_target(&dir, "PDC01", "data.txt").unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(second.path().file_name(), Some("PDC01_data_1.txt"));
    }

    #[test]
    fn discard_removes_file() {
        let (_temp, dir) = temp_dir();
        let mut claimed = claim_target(&dir, "PDC01", "data.txt").unwrap();
        claimed.write_all(b"partial").unwrap();
        let path = claimed.path().to_owned();
        claimed.discard().unwrap();
        assert!(!path.as_std_path().exists());
    }

    #[test]
    fn missing_directory_is_a_filesystem_error() {
        let (_temp, dir) = temp_dir();
        let err = claim_target(&dir.join("absent"), "PDC01", "data.txt").unwrap_err();
        assert!(matches!(err, PdcError::Filesystem(_)));
    }
}
