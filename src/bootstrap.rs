use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::{fork, ForkResult};

use crate::client::BoxClient;
use crate::config::BoxConfig;
use crate::error::{Error, Result};

/// A hook run in the child immediately after fork and before the
/// dispatch loop starts. Intended for an OS-level capability reduction
/// call (seccomp/pledge/capsicum); platform-specific, so this crate
/// only provides the injection point and a no-op default.
pub type CapabilityDrop = Box<dyn FnOnce() + Send>;

fn default_capability_drop() -> CapabilityDrop {
    Box::new(|| {})
}

/// Creates the trust boundary: validates `config`, opens a bidirectional
/// socketpair, forks, and runs the dispatch loop in the child. The
/// parent gets back a connected [`BoxClient`] and owns no SQLite state.
pub fn spawn(config: BoxConfig) -> Result<BoxClient<UnixStream>> {
    spawn_with_capability_drop(config, default_capability_drop())
}

pub fn spawn_with_capability_drop(
    config: BoxConfig,
    drop_capabilities: CapabilityDrop,
) -> Result<BoxClient<UnixStream>> {
    config.validate()?;
    let cfg = Arc::new(config);

    let (parent_fd, child_fd) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(|e| Error::Io(std::io::Error::from(e)))?;

    // SAFETY: fork() is unsafe because state shared between the two
    // resulting processes (locks, buffers held by other threads) can
    // become inconsistent; this process is single-threaded at the call
    // site, which is the documented precondition for a sound fork here.
    match unsafe { fork() }.map_err(|e| Error::Io(std::io::Error::from(e)))? {
        ForkResult::Child => {
            drop(parent_fd);
            drop_capabilities();
            let stream = owned_fd_to_stream(child_fd);
            let exit_code = match crate::server::run(stream, cfg) {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(target: "sqlbox::server", role = "child", error = %e, "dispatch loop exited with an error");
                    1
                }
            };
            std::process::exit(exit_code);
        }
        ForkResult::Parent { .. } => {
            drop(child_fd);
            let stream = owned_fd_to_stream(parent_fd);
            tracing::info!(target: "sqlbox::bootstrap", role = "parent", "server process forked");
            Ok(BoxClient::new(stream))
        }
    }
}

fn owned_fd_to_stream(fd: OwnedFd) -> UnixStream {
    // SAFETY: fd is a valid, uniquely-owned socket fd produced by
    // socketpair(); ownership transfers into the UnixStream.
    unsafe { UnixStream::from_raw_fd(fd.into_raw_fd()) }
}

