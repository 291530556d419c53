use crate::cli::actions::Action;
use anyhow::Result;
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        users_file: matches.get_one::<PathBuf>("users").cloned(),
        state_file: matches.get_one::<PathBuf>("state-file").cloned(),
    })
}
