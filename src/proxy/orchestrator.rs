//! Starts and stops every configured proxy instance.

use std::sync::Arc;

use thiserror::Error;

use crate::config::AppConfig;
use crate::net::ListenerError;
use crate::notify::{FlushReport, Notificator};
use crate::proxy::instance::{InstanceSettings, ProxyInstance};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("proxy {listen} -> {destination} failed to start: {source}")]
    Start {
        listen: String,
        destination: String,
        #[source]
        source: ListenerError,
    },
}

/// Owns the proxy instances in configuration order.
pub struct ProxyOrchestrator {
    instances: Vec<ProxyInstance>,
}

impl ProxyOrchestrator {
    pub fn new(instances: Vec<ProxyInstance>) -> Self {
        Self { instances }
    }

    /// One instance per `proxy_list` entry, all sharing `notifier`.
    pub fn from_config(config: &AppConfig, notifier: Arc<dyn Notificator>) -> Self {
        let settings = InstanceSettings::from_config(config);
        let instances = config
            .proxy_list
            .iter()
            .map(|entry| ProxyInstance::new(entry.clone(), settings.clone(), Arc::clone(&notifier)))
            .collect();
        Self::new(instances)
    }

    /// Start every instance in order.
    ///
    /// The first failure stops the instances already started and is returned.
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        for index in 0..self.instances.len() {
            if let Err(source) = self.instances[index].start().await {
                let config = self.instances[index].config();
                let err = OrchestratorError::Start {
                    listen: config.listen_target(),
                    destination: config.destination(),
                    source,
                };
                tracing::error!(error = %err, "Startup aborted");
                for started in &mut self.instances[..index] {
                    started.stop().await;
                }
                return Err(err);
            }
        }
        tracing::info!(instances = self.instances.len(), "All proxy instances started");
        Ok(())
    }

    /// Stop every instance in order and report the combined final flush.
    pub async fn stop(&mut self) -> FlushReport {
        let mut total = FlushReport::default();
        for instance in &mut self.instances {
            let report = instance.stop().await;
            total.delivered += report.delivered;
            total.failed += report.failed;
        }
        tracing::info!(
            delivered = total.delivered,
            failed = total.failed,
            "All proxy instances stopped"
        );
        total
    }

    pub fn instances(&self) -> &[ProxyInstance] {
        &self.instances
    }
}
