use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    builder::ValueParser,
    Arg, ColorChoice, Command,
};
use std::path::PathBuf;

/// Accepts a level name (error..trace) or a bare verbosity count up to 5.
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> std::result::Result<u8, String> {
        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|&count| count <= 5)
                .ok_or_else(|| format!("invalid log level: {level}")),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sentinela")
        .about("Multi-factor login core")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("SENTINELA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("users")
                .short('u')
                .long("users")
                .help("Path to the JSON users file (identity -> {password_hash, contact})")
                .env("SENTINELA_USERS")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("state-file")
                .short('s')
                .long("state-file")
                .help("Snapshot file for challenge sessions, restored at startup")
                .env("SENTINELA_STATE_FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("SENTINELA_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
