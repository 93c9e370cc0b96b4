//! Structured logging (C9): human-readable lines to stderr in the
//! foreground, or syslog once daemonized.

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the foreground logging subscriber: `tracing-subscriber`'s
/// `fmt` layer on stderr, filtered by `RUST_LOG` with `level` as the
/// default directive.
pub fn init_foreground(level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .init();
}

/// Installs the syslog-backed subscriber used once the process has
/// daemonized and no longer has a controlling terminal.
pub fn init_syslog(level: Level) -> Result<(), syslog::Error> {
    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_DAEMON,
        hostname: None,
        process: "utdns".into(),
        pid: std::process::id(),
    };
    let writer = syslog::unix(formatter)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::sync::Mutex::new(SyslogWriter(writer)))
        .with_ansi(false)
        .without_time()
        .init();

    Ok(())
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy()
}

/// Adapts a syslog connection to [`std::io::Write`] so it can back a
/// `tracing-subscriber` `fmt` layer: each formatted line becomes one
/// syslog message at INFO severity.
///
/// Per-event severity is not threaded through here because `fmt`'s writer
/// trait only sees formatted bytes, not the originating `tracing::Level`;
/// the level is still visible in the formatted line itself.
struct SyslogWriter(syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>);

impl std::io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let line = line.trim_end_matches('\n');
        if !line.is_empty() {
            let _ = self.0.info(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
