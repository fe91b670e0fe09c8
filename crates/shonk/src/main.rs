use std::sync::Arc;

use shonk_blahaj::BlahajClient;

use shonk_core::{
    config::Config,
    ledger::{JsonFileStore, Ledger},
    moderation::ModerationQueue,
    quota::QuotaManager,
    service::ShonkService,
    storage::DirStore,
};

#[tokio::main]
async fn main() -> Result<(), shonk_core::Error> {
    shonk_core::logging::init("shonk")?;

    let cfg = Arc::new(Config::load()?);

    let ledger = Arc::new(Ledger::open(Arc::new(JsonFileStore::new(cfg.ledger_file.clone()))).await?);
    let images = Arc::new(BlahajClient::new(cfg.image_api_url.clone(), cfg.http_timeout)?);

    let service = Arc::new(ShonkService::new(
        ledger,
        QuotaManager::new(cfg.quota),
        Arc::new(ModerationQueue::new(cfg.review)),
        Arc::new(DirStore::new(cfg.storage_dir.clone())),
        images,
        cfg.archive,
    ));

    shonk_telegram::router::run_polling(cfg, service)
        .await
        .map_err(|e| shonk_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
