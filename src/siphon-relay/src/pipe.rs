//! Named pipe paths and the per-platform pipe primitives.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) use platform::{create, remove, unblock, PendingPipe};

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the epoch, bumped so no two calls in this process
/// return the same value.
fn unique_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    let mut last = LAST_STAMP.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Location of one relay's named pipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipePath(PathBuf);

impl PipePath {
    /// `prefix[instance]-millis`, unique within this process.
    ///
    /// Without a prefix the platform default is used: the temp directory on
    /// Unix, the pipe namespace on Windows.
    ///
    /// Path separators in `instance` become `_` so the pipe always lands
    /// directly under the prefix.
    pub fn unique(prefix: Option<&str>, instance: &str) -> Self {
        let prefix = prefix.map_or_else(default_prefix, str::to_string);
        let instance = instance.replace(['/', '\\'], "_");
        PipePath(PathBuf::from(format!(
            "{prefix}[{instance}]-{}",
            unique_millis()
        )))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for PipePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for PipePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(unix)]
pub fn default_prefix() -> String {
    std::env::temp_dir()
        .join("siphon-pipe-")
        .to_string_lossy()
        .into_owned()
}

#[cfg(windows)]
pub fn default_prefix() -> String {
    r"\\.\pipe\siphon-".to_string()
}

#[cfg(unix)]
mod platform {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::{Path, PathBuf};

    use nix::errno::Errno;
    use nix::fcntl::OFlag;
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;

    /// A FIFO that exists on disk but has no writer open yet.
    pub(crate) struct PendingPipe {
        path: PathBuf,
    }

    /// Create the FIFO with owner-only permissions. An existing FIFO at the
    /// path is reused.
    pub(crate) fn create(path: &Path) -> io::Result<PendingPipe> {
        match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) | Err(Errno::EEXIST) => Ok(PendingPipe {
                path: path.to_path_buf(),
            }),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    impl PendingPipe {
        /// Open the write side. Blocks until a reader opens the FIFO.
        pub(crate) fn connect(self) -> io::Result<File> {
            OpenOptions::new().write(true).open(&self.path)
        }
    }

    /// Release a writer blocked in [`PendingPipe::connect`] by opening and
    /// immediately closing a non-blocking reader.
    pub(crate) fn unblock(path: &Path) -> io::Result<()> {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .map(drop)
    }

    pub(crate) fn remove(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};
    use std::path::Path;
    use std::ptr;

    use windows_sys::Win32::Foundation::{
        GetLastError, ERROR_PIPE_CONNECTED, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::Storage::FileSystem::PIPE_ACCESS_OUTBOUND;
    use windows_sys::Win32::System::Pipes::{
        ConnectNamedPipe, CreateNamedPipeW, PIPE_TYPE_BYTE, PIPE_WAIT,
    };

    const BUFFER_SIZE: u32 = 1024 * 1024;

    /// A pipe instance waiting for its client.
    pub(crate) struct PendingPipe {
        server: File,
    }

    pub(crate) fn create(path: &Path) -> io::Result<PendingPipe> {
        let name: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        // SAFETY: `name` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateNamedPipeW(
                name.as_ptr(),
                PIPE_ACCESS_OUTBOUND,
                PIPE_TYPE_BYTE | PIPE_WAIT,
                1,
                BUFFER_SIZE,
                BUFFER_SIZE,
                0,
                ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: the handle is valid and owned by nothing else.
        let server = unsafe { File::from_raw_handle(handle as RawHandle) };
        Ok(PendingPipe { server })
    }

    impl PendingPipe {
        /// Wait for a client to connect. Blocks until one does.
        pub(crate) fn connect(self) -> io::Result<File> {
            // SAFETY: the handle stays open for the duration of the call.
            let connected =
                unsafe { ConnectNamedPipe(self.server.as_raw_handle() as HANDLE, ptr::null_mut()) };
            // A client that connected between create and connect is fine.
            if connected == 0 && unsafe { GetLastError() } != ERROR_PIPE_CONNECTED {
                return Err(io::Error::last_os_error());
            }
            Ok(self.server)
        }
    }

    /// Release a server blocked in [`PendingPipe::connect`] by connecting and
    /// immediately disconnecting as a client.
    pub(crate) fn unblock(path: &Path) -> io::Result<()> {
        OpenOptions::new().read(true).open(path).map(drop)
    }

    /// Pipe names vanish with their last handle.
    pub(crate) fn remove(_path: &Path) -> io::Result<()> {
        Ok(())
    }
}
