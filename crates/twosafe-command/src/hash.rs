use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::{debug, info};

use crate::error::{CommandError, Result};
use crate::message::CommandMessage;
use crate::registry::{CommandHandler, Outcome};

/// Verb of the built-in hash command.
pub const HASH_VERB: &str = "hash";

/// Suffix appended to the source path to name the digest artifact.
pub const ARTIFACT_SUFFIX: &str = ".md5.txt";

/// `<path>.md5.txt`, next to the source file.
pub fn artifact_path(path: impl AsRef<Path>) -> PathBuf {
    let mut name = path.as_ref().as_os_str().to_os_string();
    name.push(ARTIFACT_SUFFIX);
    PathBuf::from(name)
}

/// Lock key for the artifact of `path`.
///
/// The parent directory is canonicalized so `..`, symlinked directories and
/// relative spellings of one file share a key. Falls back to the plain
/// artifact path when the directory cannot be resolved.
pub fn artifact_lock_key(path: impl AsRef<Path>) -> PathBuf {
    let artifact = artifact_path(path);
    let parent = match artifact.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(parent), artifact.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => artifact,
    }
}

/// Lowercase hex MD5 of the file's full contents.
pub fn digest_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = open_source(path)?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| CommandError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn open_source(path: &Path) -> Result<File> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => CommandError::SourceMissing {
            path: path.to_path_buf(),
        },
        _ => CommandError::SourceUnreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    if !metadata.is_file() {
        return Err(CommandError::NotRegularFile {
            path: path.to_path_buf(),
        });
    }
    File::open(path).map_err(|e| CommandError::SourceUnreadable {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Handler for `{"verb":"hash","path":...}`.
///
/// Writes the digest to [`artifact_path`], truncating prior content. The
/// artifact is only opened once the digest is complete, so a source that
/// fails mid-read never leaves an empty artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashHandler;

impl CommandHandler for HashHandler {
    fn verb(&self) -> &str {
        HASH_VERB
    }

    fn lock_key(&self, message: &CommandMessage) -> Option<PathBuf> {
        Some(artifact_lock_key(&message.path))
    }

    fn execute(&self, message: &CommandMessage) -> Result<Outcome> {
        let source = Path::new(&message.path);
        debug!(path = ?source, "computing MD5 hash");
        let digest = digest_file(source)?;

        let artifact = artifact_path(source);
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&artifact)
            .map_err(|e| CommandError::ArtifactUnwritable {
                path: artifact.clone(),
                source: e,
            })?;
        out.write_all(digest.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| CommandError::Io {
                path: artifact.clone(),
                source: e,
            })?;

        info!(path = ?source, %digest, "wrote hash artifact");
        Ok(Outcome {
            artifacts: vec![artifact],
            summary: digest,
        })
    }
}
