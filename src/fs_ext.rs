// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

pub fn absolute_path(path: &Path) -> PathBuf {
    // TODO: replace with std::path::absolute once MSRV allows
    path.absolutize()
        .expect("should be absolute path")
        .into_owned()
}

fn fs_extra_error(e: &fs_extra::error::Error) -> crate::Error {
    crate::Error::Io(std::io::Error::other(e.to_string()))
}

/// Returns the summed size of all files below `path`.
pub fn dir_size(path: &Path) -> crate::Result<u64> {
    fs_extra::dir::get_size(path).map_err(|e| fs_extra_error(&e))
}

/// Copies all directory entries into `dest`, skipping the given file names.
///
/// `dest` is created if missing.
pub fn copy_dir_contents(src: &Path, dest: &Path, exclude: &[&str]) -> crate::Result<()> {
    std::fs::create_dir_all(dest)?;

    let mut items = Vec::new();
    for dirent in std::fs::read_dir(src)? {
        let dirent = dirent?;

        let name = dirent.file_name();
        if exclude.iter().any(|skip| name.as_os_str() == *skip) {
            continue;
        }

        items.push(dirent.path());
    }

    let options = fs_extra::dir::CopyOptions::new().overwrite(true);
    fs_extra::copy_items(&items, dest, &options).map_err(|e| fs_extra_error(&e))?;

    Ok(())
}
