use std::sync::Arc;

use crate::{config::AppConfig, engine::EligibilityService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<EligibilityService>,
}

impl AppState {
    pub fn new(config: AppConfig, service: EligibilityService) -> Self {
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
        }
    }
}
