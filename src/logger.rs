use log::LevelFilter;
use env_logger::Builder;
use std::io::Write;
use chrono::Local;

/// `RUST_LOG`, when set, wins over `verbose`.
pub fn init(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    Builder::new()
        .format(|buf, record| {
            writeln!(buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        // html5ever and reqwest are noisy at debug
        .filter(Some("html5ever"), LevelFilter::Warn)
        .filter(Some("selectors"), LevelFilter::Warn)
        .filter(Some("reqwest"), LevelFilter::Info)
        .parse_default_env()
        .init();

    log::debug!("Logger initialized.");
}
