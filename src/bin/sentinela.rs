use anyhow::Result;
use sentinela::cli::{actions, actions::Action, start};

#[tokio::main]
async fn main() -> Result<()> {
    match start()? {
        action @ Action::Server { .. } => actions::server::handle(action).await,
    }
}
