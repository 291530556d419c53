pub mod server;

use std::path::PathBuf;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        users_file: Option<PathBuf>,
        state_file: Option<PathBuf>,
    },
}
