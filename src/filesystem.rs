use std::fs::File;
use std::io::{BufReader, Error, ErrorKind};
use std::path::{Path, PathBuf};

use relative_path::RelativePath;

use crate::*;

#[derive(Debug, thiserror::Error)]
pub enum FileLoadError<DecodeError: std::error::Error + 'static> {
    #[error("unable to open asset")]
    Io(#[from] Error),
    #[error("unable to decode asset")]
    Decode(#[source] DecodeError),
}

/// A [Loader] which reads keys as paths below a given root directory and runs a [Decoder] over the file.
///
/// This handles the rather tricky path cases around Windows and Linux differences, and makes it so that you can and
/// should use keys like `/b/c` (behavior with `\` is undefined).  Additionally, it makes a best effort to disallow a
/// user to use relative paths to escape the root directory, primarily as a measure to detect bugs.
#[derive(Debug)]
pub struct FileLoader<D> {
    root_path: PathBuf,
    decoder: D,
}

impl<D: Decoder> FileLoader<D> {
    pub fn new(root_path: &Path, decoder: D) -> FileLoader<D> {
        FileLoader {
            root_path: root_path.to_path_buf(),
            decoder,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Run the file opening logic, so that this can be reused for normal file access at the same time.
    pub fn open_file(&self, key: &str) -> std::io::Result<File> {
        // On Windows, canonicalize is currently very broken when relative path segments appear in the middle of a
        // path, and stdlib doesn't help us out. Go via `RelativePath` to clean it up.
        let absolute = RelativePath::new(key).to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) {
            return Err(Error::new(
                ErrorKind::Other,
                "path is outside the loader's root directory",
            ));
        }
        File::open(absolute)
    }
}

impl<D: Decoder> Loader for FileLoader<D> {
    type Output = D::Output;
    type Error = FileLoadError<D::Error>;

    fn load(&self, key: &str) -> Result<D::Output, Self::Error> {
        let file = self.open_file(key)?;
        self.decoder
            .decode(BufReader::new(file))
            .map_err(FileLoadError::Decode)
    }

    fn dispose(&self, item: &D::Output) {
        self.decoder.dispose(item)
    }
}
