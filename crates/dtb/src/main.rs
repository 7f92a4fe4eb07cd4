use std::sync::Arc;

use dtb_core::{config::Config, store::DiaryStore};

#[tokio::main]
async fn main() -> Result<(), dtb_core::Error> {
    dtb_core::logging::init("dtb")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(DiaryStore::open(&cfg.database_path).await?);

    dtb_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| dtb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
