//! Flatten command implementation

use crate::config::Config;
use crate::engine::Engine;
use clap::Args;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct FlattenArgs {
    /// Seconds to wait for the account sync
    #[arg(long, default_value_t = 10)]
    pub sync_timeout: u64,
}

impl FlattenArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let engine = Engine::start(config).await?;
        let result = async {
            engine
                .wait_for_sync(Duration::from_secs(self.sync_timeout))
                .await?;
            let ids = engine.orders().flatten_positions().await;
            if ids.is_empty() {
                println!("No open positions");
            }
            for id in ids {
                if let Some(order) = engine.orders().order(id) {
                    println!(
                        "{} {} {} x{} -> {:?}",
                        order.id,
                        order.request.side.as_str(),
                        order.symbol(),
                        order.request.quantity,
                        order.status
                    );
                }
            }
            anyhow::Ok(())
        }
        .await;
        engine.shutdown();
        result
    }
}
