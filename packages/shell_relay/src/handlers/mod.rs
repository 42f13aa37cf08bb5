pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, metrics_handler};
pub use websocket::terminal_handler;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::AppState;
    use crate::cluster::KubeClientFactory;
    use crate::config::{FileConfig, RelayConfig};

    /// State backed by a client factory with no config sources.
    pub(crate) fn test_state() -> AppState {
        let config = RelayConfig::from_file(&FileConfig::default()).unwrap();
        let factory = KubeClientFactory::with_environment(config.kube.clone(), None, None);
        AppState::new(&config, factory)
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
