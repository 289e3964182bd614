use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use bytes::{Bytes, BytesMut};
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

use crate::resource::mime::MimeType;

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{} not found", path.display())]
    NotFound { path: PathBuf },

    #[error("{} is not a readable regular file", path.display())]
    Forbidden { path: PathBuf },

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("failed to lock {}: {errno}", path.display())]
    Lock { path: PathBuf, errno: nix::errno::Errno },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ResourceError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => ResourceError::NotFound { path },
            io::ErrorKind::PermissionDenied => ResourceError::Forbidden { path },
            // names that can never resolve: NUL bytes, overlong or looping paths
            io::ErrorKind::InvalidInput => ResourceError::NotFound { path },
            _ if matches!(
                source.raw_os_error(),
                Some(libc::ENOTDIR | libc::ENAMETOOLONG | libc::ELOOP)
            ) =>
            {
                ResourceError::NotFound { path }
            }
            _ => ResourceError::Io { path, source },
        }
    }
}

#[derive(Debug, Clone)]
enum Body {
    Lazy,
    Buffer(Bytes),
}

/// A readable regular file resolved for one request.
///
/// `size` always equals the number of bytes the content will yield: for the
/// eager variant it is the length of the buffer, for the lazy variant it is
/// the on-disk size at resolution time.
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
    name: String,
    size: u64,
    mime_type: MimeType,
    body: Body,
}

impl File {
    /// Resolves `path` literally, without reading any content.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let path = path.as_ref();
        let realpath = fs::canonicalize(path).map_err(|e| ResourceError::from_io(path, e))?;
        Self::inspect(realpath)
    }

    /// Resolves `path` and reads the whole file into memory under a shared lock.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let mut file = Self::resolve(path)?;
        let content = read_locked(&file.path)?;
        file.size = content.len() as u64;
        file.body = Body::Buffer(content);
        Ok(file)
    }

    fn inspect(realpath: PathBuf) -> Result<Self, ResourceError> {
        let metadata = fs::metadata(&realpath).map_err(|e| ResourceError::from_io(&realpath, e))?;
        if !metadata.is_file() {
            return Err(ResourceError::Forbidden { path: realpath });
        }
        // readability check; the handle is dropped right away
        fs::File::open(&realpath).map_err(|e| ResourceError::from_io(&realpath, e))?;

        let name = realpath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            mime_type: MimeType::from_path(&realpath),
            size: metadata.len(),
            name,
            path: realpath,
            body: Body::Lazy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> MimeType {
        self.mime_type
    }

    /// The in-memory content, present only for files built with [`File::from_path`].
    pub fn content(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Buffer(bytes) => Some(bytes),
            Body::Lazy => None,
        }
    }

    /// Yields the content as chunks of at most `chunk_size` bytes.
    ///
    /// For a lazy file every chunk is read under a shared lock that is taken and
    /// released around that single read, so a long transfer never starves writers.
    pub fn chunks(&self, chunk_size: usize) -> Result<Chunks, ResourceError> {
        if chunk_size == 0 {
            return Err(ResourceError::InvalidChunkSize);
        }

        let source = match &self.body {
            Body::Buffer(bytes) => Source::Memory(bytes.clone()),
            Body::Lazy => {
                let file = fs::File::open(&self.path).map_err(|e| ResourceError::from_io(&self.path, e))?;
                Source::Disk {
                    path: self.path.clone(),
                    file: Some(file),
                    remaining: self.size,
                }
            }
        };

        Ok(Chunks { source, chunk_size })
    }
}

/// Finite, non-restartable chunk sequence returned by [`File::chunks`].
#[derive(Debug)]
pub struct Chunks {
    source: Source,
    chunk_size: usize,
}

#[derive(Debug)]
enum Source {
    Memory(Bytes),
    Disk {
        path: PathBuf,
        file: Option<fs::File>,
        // bytes still owed to the reader; growth after resolution is never sent
        remaining: u64,
    },
}

impl Iterator for Chunks {
    type Item = Result<Bytes, ResourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Memory(rest) => {
                if rest.is_empty() {
                    return None;
                }
                let n = self.chunk_size.min(rest.len());
                Some(Ok(rest.split_to(n)))
            }
            Source::Disk { path, file, remaining } => {
                if *remaining == 0 {
                    file.take();
                    return None;
                }
                let handle = file.take()?;
                let want = (self.chunk_size as u64).min(*remaining) as usize;
                match read_chunk(path, handle, want) {
                    Ok((handle, chunk)) if !chunk.is_empty() => {
                        *remaining -= chunk.len() as u64;
                        *file = Some(handle);
                        Some(Ok(chunk))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            }
        }
    }
}

impl std::iter::FusedIterator for Chunks {}

fn lock_shared(path: &Path, file: fs::File) -> Result<Flock<fs::File>, ResourceError> {
    Flock::lock(file, FlockArg::LockShared).map_err(|(_, errno)| ResourceError::Lock {
        path: path.to_path_buf(),
        errno,
    })
}

fn unlock(path: &Path, guard: Flock<fs::File>) -> Result<fs::File, ResourceError> {
    guard.unlock().map_err(|(_, errno)| ResourceError::Lock {
        path: path.to_path_buf(),
        errno,
    })
}

fn read_chunk(path: &Path, file: fs::File, chunk_size: usize) -> Result<(fs::File, Bytes), ResourceError> {
    let mut guard = lock_shared(path, file)?;

    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;
    while filled < chunk_size {
        match guard.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ResourceError::from_io(path, e)),
        }
    }
    buf.truncate(filled);

    let file = unlock(path, guard)?;
    Ok((file, buf.freeze()))
}

fn read_locked(path: &Path) -> Result<Bytes, ResourceError> {
    let file = fs::File::open(path).map_err(|e| ResourceError::from_io(path, e))?;
    let mut guard = lock_shared(path, file)?;

    let mut content = Vec::new();
    guard
        .read_to_end(&mut content)
        .map_err(|e| ResourceError::from_io(path, e))?;

    unlock(path, guard)?;
    Ok(Bytes::from(content))
}

/// Maps request paths onto files, optionally confined to a serving root.
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: Option<PathBuf>,
}

impl FileResolver {
    /// Confines every request to `root`. The root must exist.
    pub fn sandboxed(root: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(|e| ResourceError::from_io(root, e))?;
        Ok(Self { root: Some(root) })
    }

    /// Takes request paths as literal filesystem paths.
    pub fn unrestricted() -> Self {
        Self { root: None }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn resolve(&self, request_path: &str) -> Result<File, ResourceError> {
        let Some(root) = &self.root else {
            return File::resolve(request_path);
        };

        let relative = Path::new(request_path.trim_start_matches('/'));
        let candidate = root.join(relative);
        // a `..` past the root is refused whether or not its target exists
        if escapes_root(relative) {
            return Err(ResourceError::Forbidden { path: candidate });
        }

        let realpath = fs::canonicalize(&candidate).map_err(|e| ResourceError::from_io(&candidate, e))?;
        if !realpath.starts_with(root) {
            return Err(ResourceError::Forbidden { path: candidate });
        }
        File::inspect(realpath)
    }
}

fn escapes_root(relative: &Path) -> bool {
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth == 0 => return true,
            Component::ParentDir => depth -= 1,
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}
