use super::{Call, Declaration, Interceptor, InterceptorResult, InvocationKind};
use crate::config::DecoratorOptions;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// How call records are handed to the [`CallLogger`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogMode {
    /// `CallLogger::log`, inline
    Sync,
    /// `CallLogger::log_async`, awaited before the call returns
    #[default]
    Async,
}

/// Structured audit record of one intercepted call
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub correlation_id: Uuid,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    pub cache_hit: bool,
    pub namespace: String,
    pub class: String,
    pub method: String,
    pub kind: InvocationKind,
    pub arguments: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

/// Sink for call records
#[async_trait]
pub trait CallLogger: Send + Sync + 'static {
    fn log(&self, record: &CallRecord);

    async fn log_async(&self, record: &CallRecord) {
        self.log(record);
    }
}

/// Emits every call record as a `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallLogger;

#[async_trait]
impl CallLogger for TracingCallLogger {
    fn log(&self, record: &CallRecord) {
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(e) => format!("<unserializable record: {e}>"),
        };
        let method = format!("{}::{}", record.class, record.method);

        if record.success {
            tracing::info!(
                correlation_id = %record.correlation_id,
                method = %method,
                elapsed_ms = record.elapsed_ms,
                cache_hit = record.cache_hit,
                "{}",
                payload
            );
        } else {
            tracing::warn!(
                correlation_id = %record.correlation_id,
                method = %method,
                elapsed_ms = record.elapsed_ms,
                exception = record.exception.as_deref().unwrap_or_default(),
                "{}",
                payload
            );
        }
    }
}

/// Adds extra properties to every call record
pub trait LogEnricher: Send + Sync + 'static {
    fn enrich(&self, call: &Call<'_>, properties: &mut Map<String, Value>);
}

/// Per-method settings of the log interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub arguments: bool,
    pub result: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            arguments: true,
            result: true,
        }
    }
}

impl LogSettings {
    /// Keeps argument values out of the record
    pub fn without_arguments(mut self) -> Self {
        self.arguments = false;
        self
    }

    /// Keeps the result out of the record
    pub fn without_result(mut self) -> Self {
        self.result = false;
        self
    }
}

impl From<LogSettings> for Declaration {
    fn from(settings: LogSettings) -> Self {
        Declaration::with::<LogInterceptor, _>(settings)
    }
}

/// Records every call: timing, outcome, arguments and result.
///
/// Errors from further down the chain are recorded and then returned
/// unchanged. Logging never alters the value the caller receives.
pub struct LogInterceptor {
    logger: Arc<dyn CallLogger>,
    mode: LogMode,
    strip_metadata: bool,
    enrichers: Vec<Arc<dyn LogEnricher>>,
    order: i32,
}

impl LogInterceptor {
    pub const DEFAULT_ORDER: i32 = 0;

    pub fn new(logger: Arc<dyn CallLogger>) -> Self {
        Self {
            logger,
            mode: LogMode::default(),
            strip_metadata: true,
            enrichers: Vec::new(),
            order: Self::DEFAULT_ORDER,
        }
    }

    pub fn from_options(logger: Arc<dyn CallLogger>, options: &DecoratorOptions) -> Self {
        Self::new(logger)
            .with_mode(options.log_mode)
            .strip_metadata(options.strip_log_metadata)
    }

    pub fn with_mode(mut self, mode: LogMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn strip_metadata(mut self, strip: bool) -> Self {
        self.strip_metadata = strip;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn LogEnricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    fn properties(&self, call: &Call<'_>) -> Map<String, Value> {
        let mut properties = call
            .caller()
            .map(|caller| caller.properties().clone())
            .unwrap_or_default();
        for enricher in &self.enrichers {
            enricher.enrich(call, &mut properties);
        }
        properties
    }

    fn result(&self, call: &mut Call<'_>) -> Option<Value> {
        let metadata = if self.strip_metadata {
            call.take_metadata()
        } else {
            None
        };

        let result = match call.return_json()? {
            Ok(value) => value,
            Err(e) => Value::String(format!("<unserializable result: {e}>")),
        };

        if let Some(metadata) = metadata {
            call.restore_metadata(metadata);
        }
        Some(result)
    }
}

impl Default for LogInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(TracingCallLogger))
    }
}

#[async_trait]
impl Interceptor for LogInterceptor {
    fn order(&self) -> i32 {
        self.order
    }

    async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
        let settings = call.settings::<LogSettings>().copied().unwrap_or_default();
        let timestamp = Utc::now();
        let started = Instant::now();

        let outcome = call.next().await;
        let elapsed = started.elapsed();

        let success = match &outcome {
            Ok(()) => call.succeeded().unwrap_or(true),
            Err(_) => false,
        };
        let result = if settings.result && outcome.is_ok() {
            self.result(call)
        } else {
            None
        };
        let arguments = if settings.arguments {
            call.arguments().to_map()
        } else {
            Map::new()
        };

        let method = call.method();
        let record = CallRecord {
            correlation_id: Uuid::new_v4(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            timestamp,
            success,
            exception: outcome.as_ref().err().map(ToString::to_string),
            cache_hit: !call.proceed_to_original(),
            namespace: method.namespace().to_string(),
            class: method.class().to_string(),
            method: method.name().to_string(),
            kind: method.kind(),
            arguments,
            result,
            properties: self.properties(call),
        };

        match self.mode {
            LogMode::Sync => self.logger.log(&record),
            LogMode::Async => self.logger.log_async(&record).await,
        }

        outcome
    }
}
