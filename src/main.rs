use utdns::clock::SystemClock;
use utdns::config::Config;
use utdns::daemon;
use utdns::dispatcher::Dispatcher;
use utdns::logging;

fn main() -> anyhow::Result<()> {
    let config = Config::from_args()?;

    if config.daemonize {
        daemon::daemonize();
        logging::init_syslog(config.log_level)?;
    } else {
        logging::init_foreground(config.log_level);
    }

    let mut dispatcher = Dispatcher::new(&config, SystemClock::new())?;

    daemon::drop_privileges()?;

    tracing::info!(
        upstream = %config.upstream,
        port = config.listen_port,
        family = ?config.family,
        "utdns starting"
    );

    dispatcher.run()?;

    Ok(())
}
