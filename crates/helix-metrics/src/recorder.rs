//! Metrics recorder initialization.

use tracing::info;

/// Handle to the metrics system, providing access to exported metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format. Empty when the
    /// `prometheus` feature is not compiled in.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system. Call once at process startup.
///
/// # Errors
///
/// Returns an error if the Prometheus recorder fails to install.
pub fn init_metrics(
    config: MetricsRecorderConfig,
) -> Result<MetricsHandle, Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("metrics collection disabled");
        #[cfg(feature = "prometheus")]
        {
            let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
            return Ok(MetricsHandle {
                prometheus_handle: handle,
            });
        }
        #[cfg(not(feature = "prometheus"))]
        {
            return Ok(MetricsHandle {});
        }
    }

    #[cfg(feature = "prometheus")]
    {
        use crate::definitions::buckets;
        use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

        let mut builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_string()),
                &buckets::SHORT_DURATION,
            )?
            .set_buckets_for_metric(
                Matcher::Prefix("helix_llm_completion".to_string()),
                &buckets::LLM_DURATION,
            )?
            .set_buckets_for_metric(
                Matcher::Full(crate::llm::TIME_TO_FIRST_TOKEN_SECONDS.to_string()),
                &buckets::TTFT,
            )?;

        for (key, value) in config.global_labels {
            builder = builder.add_global_label(key, value);
        }

        let handle = builder.install_recorder()?;
        info!("prometheus metrics exporter initialized");
        Ok(MetricsHandle {
            prometheus_handle: handle,
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics feature not enabled at compile time");
        Ok(MetricsHandle {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_handle_renders_without_panicking() {
        let config = MetricsRecorderConfig {
            enabled: false,
            ..Default::default()
        };
        let handle = init_metrics(config).expect("init");
        let _ = handle.render();
    }
}
