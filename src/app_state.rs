use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{
    config::AppConfig,
    inventory::{AssetInventory, PathFormatter},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub inventory: Arc<dyn AssetInventory>,
    // Sin formateador del host se usa el directorio base o el nombre del fichero.
    pub formatter: Option<Arc<dyn PathFormatter>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
