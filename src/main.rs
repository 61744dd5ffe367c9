//! # External Secrets Operator
//!
//! Entry point: initialize the runtime, then run the controllers until shutdown.

use external_secrets_operator::runtime::initialization::initialize;
use external_secrets_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let init = initialize().await?;
    run_watch_loop(
        init.client,
        init.context,
        init.server_state,
        init.controller_config,
    )
    .await
}
