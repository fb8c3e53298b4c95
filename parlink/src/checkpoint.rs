//! Durable resume checkpoints.
//!
//! For an output file `P` the checkpoint lives beside it as `P.temp` and
//! holds the number of contiguous, acknowledged blocks already written, as
//! decimal ASCII. It is updated after every accepted block, survives crashes
//! and Ctrl-C, and is deleted only on a clean end-of-transfer.
//!
//! `save` goes through a sibling `P.temp.new` file and renames it into
//! place, so an interrupted save never clobbers a valid checkpoint.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Checkpoint path for `out_path`: the same name with `.temp` appended.
pub fn path_for(out_path: &Path) -> PathBuf {
    let mut name = OsString::from(out_path.as_os_str());
    name.push(".temp");
    PathBuf::from(name)
}

/// Loads the checkpointed block count for `out_path`.
///
/// A missing or unparseable checkpoint means the transfer starts from
/// scratch, so this returns 0 rather than an error.
pub fn load(out_path: &Path) -> u64 {
    let path = path_for(out_path);
    match fs::read_to_string(&path) {
        Ok(content) => match content.trim().parse() {
            Ok(blocks) => blocks,
            Err(_) => {
                warn!(
                    "checkpoint {} is unreadable, starting from scratch",
                    path.display()
                );
                0
            }
        },
        Err(_) => 0,
    }
}

/// Durably records `blocks` as the checkpoint for `out_path`.
pub fn save(out_path: &Path, blocks: u64) -> io::Result<()> {
    let path = path_for(out_path);
    let mut staging = OsString::from(path.as_os_str());
    staging.push(".new");
    let staging = PathBuf::from(staging);

    let mut file = File::create(&staging)?;
    file.write_all(blocks.to_string().as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&staging, &path)
}

/// Removes the checkpoint for `out_path`. Idempotent.
pub fn remove(out_path: &Path) -> io::Result<()> {
    match fs::remove_file(path_for(out_path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("recebido_data.bin");
        save(&out, 42).unwrap();
        assert_eq!(load(&out), 42);

        save(&out, 43).unwrap();
        assert_eq!(load(&out), 43);
    }

    #[test]
    fn missing_checkpoint_means_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("never_seen")), 0);
    }

    #[test]
    fn garbage_checkpoint_means_zero() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("recebido_data.bin");
        fs::write(path_for(&out), "not a number").unwrap();
        assert_eq!(load(&out), 0);
    }

    #[test]
    fn trailing_whitespace_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("recebido_data.bin");
        fs::write(path_for(&out), "17\n").unwrap();
        assert_eq!(load(&out), 17);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("recebido_data.bin");
        save(&out, 1).unwrap();
        remove(&out).unwrap();
        remove(&out).unwrap();
        assert!(!path_for(&out).exists());
    }

    #[test]
    fn stale_staging_file_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("recebido_data.bin");
        let mut staging = OsString::from(path_for(&out).as_os_str());
        staging.push(".new");
        fs::write(PathBuf::from(staging), "999").unwrap();

        save(&out, 7).unwrap();
        assert_eq!(load(&out), 7);
    }
}
