//! Named pipe endpoints.
//!
//! # Platform Behavior
//! - **Unix**: a Unix domain socket at `<tmp>/<name>.sock`, or at `name` itself
//!   when it is an absolute path
//! - **Windows**: a named pipe at `\\.\pipe\<name>`

#[cfg(unix)]
pub use unix::{accept_one, connect, pipe_address};

#[cfg(windows)]
pub use windows::{accept_one, connect, pipe_address};

#[cfg(unix)]
mod unix {
    use std::io;
    use std::path::{Path, PathBuf};

    use tokio::net::{UnixListener, UnixStream};
    use tracing::debug;

    /// Filesystem address backing a pipe name.
    pub fn pipe_address(name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::temp_dir().join(format!("{}.sock", name))
        }
    }

    /// Removes the socket file when the listener goes away, including on timeout.
    struct SocketFileGuard(PathBuf);

    impl Drop for SocketFileGuard {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.0) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Failed to remove socket {}: {}", self.0.display(), e);
                }
            }
        }
    }

    pub async fn accept_one(name: &str) -> io::Result<UnixStream> {
        let path = pipe_address(name);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&path)?;
        let _guard = SocketFileGuard(path);
        let (stream, _) = listener.accept().await?;
        debug!("Accepted pipe peer on {}", name);
        Ok(stream)
    }

    pub async fn connect(name: &str) -> io::Result<UnixStream> {
        UnixStream::connect(pipe_address(name)).await
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::path::PathBuf;

    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use tracing::debug;

    const PIPE_PREFIX: &str = r"\\.\pipe\";

    /// Full pipe path for a pipe name.
    pub fn pipe_address(name: &str) -> PathBuf {
        if name.starts_with(PIPE_PREFIX) {
            PathBuf::from(name)
        } else {
            PathBuf::from(format!("{}{}", PIPE_PREFIX, name))
        }
    }

    pub async fn accept_one(name: &str) -> io::Result<NamedPipeServer> {
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(pipe_address(name))?;
        server.connect().await?;
        debug!("Accepted pipe peer on {}", name);
        Ok(server)
    }

    pub async fn connect(name: &str) -> io::Result<NamedPipeClient> {
        ClientOptions::new().open(pipe_address(name))
    }
}
