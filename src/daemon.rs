//! Process lifecycle (C10): daemonization and privilege dropping.

use std::io;

use crate::error::FatalError;

/// The conventional unprivileged user/group id this translator drops to.
const UNPRIVILEGED_ID: libc::uid_t = 65534;

/// Forks, detaches from the controlling terminal, changes directory to
/// `/`, clears the umask, and redirects stdio to the null device.
///
/// The parent exits immediately on a successful fork; only the child
/// returns. A failed fork is reported but not fatal — the process simply
/// stays in the foreground.
pub fn daemonize() {
    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Parent { child, .. }) => {
            tracing::debug!(child = child.as_raw(), "backgrounded, parent exiting");
            std::process::exit(0);
        }
        Ok(nix::unistd::ForkResult::Child) => {
            nix::sys::stat::umask(nix::sys::stat::Mode::empty());

            if let Err(e) = nix::unistd::setsid() {
                tracing::warn!(error = %e, "could not set session id");
            }
            if let Err(e) = std::env::set_current_dir("/") {
                tracing::warn!(error = %e, "could not change directory to /");
            }
            if let Err(e) = redirect_stdio_to_null() {
                tracing::warn!(error = %e, "could not redirect standard streams to the null device");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "fork failed, staying in foreground");
        }
    }
}

fn redirect_stdio_to_null() -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let null_r = std::fs::File::open("/dev/null")?;
    let null_w = std::fs::OpenOptions::new().write(true).open("/dev/null")?;

    unsafe {
        if libc::dup2(null_r.as_raw_fd(), libc::STDIN_FILENO) == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::dup2(null_w.as_raw_fd(), libc::STDOUT_FILENO) == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::dup2(null_w.as_raw_fd(), libc::STDERR_FILENO) == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

/// Drops from root to the fixed unprivileged identity, if currently root.
/// A no-op for a non-root invocation, matching typical deployment where
/// the process is started as root only to bind the privileged UDP port.
pub fn drop_privileges() -> Result<(), FatalError> {
    if unsafe { libc::getuid() } != 0 {
        return Ok(());
    }

    if unsafe { libc::setgid(UNPRIVILEGED_ID as libc::gid_t) } == -1 {
        return Err(FatalError::PrivilegeDropFailed(
            io::Error::last_os_error().to_string(),
        ));
    }
    if unsafe { libc::setuid(UNPRIVILEGED_ID) } == -1 {
        return Err(FatalError::PrivilegeDropFailed(
            io::Error::last_os_error().to_string(),
        ));
    }

    let regained = unsafe { libc::setuid(0) != -1 || libc::setgid(0) != -1 };
    if regained {
        return Err(FatalError::PrivilegeDropFailed(
            "privileges could be regained after dropping".to_string(),
        ));
    }

    Ok(())
}
