use std::env;

use annotator_store::server::{Store, StoreConfig};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    env_logger::init();

    let config_str = match env::var("ANNOTATOR_STORE_CONFIG") {
        Ok(config_str) => config_str,
        Err(_) => {
            log::warn!(
                "ANNOTATOR_STORE_CONFIG is not set, using defaults with an in-memory index"
            );
            "{}".to_string()
        }
    };

    let config = match serde_json::from_str::<StoreConfig>(&config_str) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Error parsing config:\n{}\n\n{}", err, config_str);
            return;
        }
    };

    let store = Store::new(config);
    if let Err(err) = store.run().await {
        log::error!("annotator-store stopped: {}", err);
    }
}
