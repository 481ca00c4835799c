use std::sync::Arc;

use chat_core::Result;
use chat_engine::ConversationFacade;
use chat_llm::{OpenAIProvider, ProviderClient};

use crate::server::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<ConversationFacade>,
}

impl AppState {
    pub fn new(facade: ConversationFacade) -> Self {
        Self {
            facade: Arc::new(facade),
        }
    }

    /// Wire an OpenAI-compatible provider into a facade on the shared loop.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let provider: Arc<dyn ProviderClient> = Arc::new(
            OpenAIProvider::new(config.api_key.clone())
                .with_base_url(config.llm_base_url.clone())
                .with_model(config.model.clone()),
        );
        let facade = ConversationFacade::new(provider, config.engine.clone())?;
        Ok(Self::new(facade))
    }
}
