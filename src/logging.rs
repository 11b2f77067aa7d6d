use log::LevelFilter;

/// Maps the number of `-v` flags to a level filter for this crate.
pub fn level_from_verbosity(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initializes `env_logger` for the given crates. `RUST_LOG`, when set,
/// takes precedence over `level`.
pub fn init_with_level(crates: &[&str], level: LevelFilter) {
    let filter = crates
        .iter()
        .map(|name| format!("{}={}", name, level.as_str().to_lowercase()))
        .collect::<Vec<_>>()
        .join(",");

    let env = env_logger::Env::default().default_filter_or(filter);
    // A second initialization (e.g. from several tests) is not an error.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
