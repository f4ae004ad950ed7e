//! # Módulo de Telemetria
//!
//! Logs estruturados via `tracing` e, opcionalmente, traces exportados por
//! OTLP (Jaeger, Tempo, ...). Cada ação do orquestrador e cada step vira um
//! span, então uma falha no portal aparece como:
//!
//! ```text
//! [provider_open] ──────────────────────────────────────────>
//!   [run_with_timeout provider_open] ──────────────────────>
//!     [click_table_cell_link table=table#anchoDoc] ──> erro
//! ```
//!
//! ## Variáveis de ambiente:
//!
//! - `RUST_LOG`: filtro de nível (padrão `info`)
//! - `OTEL_SERVICE_NAME`: nome do serviço (padrão `sri-agent`)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: coletor OTLP; sem ele só há console
//! - `OTEL_TRACES_SAMPLER_ARG`: taxa de sampling (0.0-1.0)
//!
//! Os logs vão para stderr: stdout fica livre para os resultados em JSON
//! da CLI.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const DEFAULT_SERVICE_NAME: &str = "sri-agent";

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,

    /// Endpoint OTLP gRPC (ex: "http://localhost:4317"). `None` = só console.
    pub otlp_endpoint: Option<String>,

    /// 1.0 coleta tudo, 0.0 nada.
    pub sampling_ratio: f64,

    pub enable_console_logging: bool,

    /// Nível usado quando `RUST_LOG` não está definido.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = get("OTEL_SERVICE_NAME").filter(|n| !n.trim().is_empty()) {
            config.service_name = name;
        }

        config.otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty());

        if let Some(ratio) = get("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.trim().parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }

    /// Nível mais verboso para `--verbose` na CLI.
    pub fn verbose(mut self, enabled: bool) -> Self {
        if enabled {
            self.log_level = Level::DEBUG;
        }
        self
    }
}

// ============================================================================
// INICIALIZAÇÃO
// ============================================================================

/// Camadas de saída: OTLP (se houver tracer) e console em stderr.
pub fn output_layers(
    config: &TelemetryConfig,
    tracer: Option<Tracer>,
) -> Vec<Box<dyn Layer<Registry> + Send + Sync>> {
    let mut layers = Vec::new();
    if let Some(tracer) = tracer {
        layers.push(OpenTelemetryLayer::new(tracer).boxed());
    }
    if config.enable_console_logging {
        layers.push(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }
    layers
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()))
}

/// Instala o subscriber global.
///
/// - `Ok(Some(Tracer))`: OTLP ativo
/// - `Ok(None)`: apenas console
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let tracer = match &config.otlp_endpoint {
        Some(endpoint) => Some(init_otlp_tracer(
            &config.service_name,
            endpoint,
            config.sampling_ratio,
        )?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(output_layers(&config, tracer.clone()))
        .with(env_filter(&config))
        .init();

    match &config.otlp_endpoint {
        Some(endpoint) => tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "Telemetria OTEL inicializada"
        ),
        None => tracing::debug!("Telemetria inicializada (apenas console, sem OTLP)"),
    }
    Ok(tracer)
}

/// Sampler para a taxa configurada.
pub fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn init_otlp_tracer(service_name: &str, endpoint: &str, sampling_ratio: f64) -> anyhow::Result<Tracer> {
    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler_for(sampling_ratio))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);
    Ok(tracer)
}

/// Flush dos spans pendentes. Chamar antes de sair.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
