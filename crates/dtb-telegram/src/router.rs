use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher as TgDispatcher, dptree, prelude::*};

use dtb_core::{config::Config, dispatcher::Dispatcher, store::DiaryStore};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<DiaryStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!(bot = me.username(), "diary bot started");
    }
    tracing::info!(db = %cfg.database_path.display(), "using database");

    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        store,
        messenger,
        cfg.list_page_size,
    ));

    // External idle-timeout policy: abandoned sessions are cancelled with
    // the same semantics as an explicit /cancel.
    if let Some(timeout) = cfg.session_idle_timeout {
        let dispatcher = dispatcher.clone();
        let every = (timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                dispatcher.expire_idle(timeout).await;
            }
        });
    }

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        dispatcher,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    TgDispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
