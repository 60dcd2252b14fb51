use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{LlmCompletion, LlmGateway, LlmGatewayError, LlmGatewayRequest, LlmTokenUsage};
use crate::prompts::FeatureMode;

const METRIC_NAME: &str = "relay_generation";
const HEALTH_METRIC_NAME: &str = "relay_provider_health";
const DEGRADED_AFTER_FAILURES: u32 = 5;
const DEGRADED_AFTER: Duration = Duration::from_secs(120);

static PROVIDER_HEALTH: LazyLock<Mutex<ProviderHealth>> = LazyLock::new(|| {
    Mutex::new(ProviderHealth::new(DEGRADED_AFTER_FAILURES, DEGRADED_AFTER))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmExecutionSource {
    ApiGenerate,
    ApiGenerateStream,
    ApiAnalyze,
}

impl LlmExecutionSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiGenerate => "generate",
            Self::ApiGenerateStream => "generate_stream",
            Self::ApiAnalyze => "analyze",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success {
        response_chars: usize,
        model: Option<String>,
        usage: Option<LlmTokenUsage>,
    },
    Failure {
        error_type: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct LlmTelemetryEvent {
    pub source: LlmExecutionSource,
    pub mode: FeatureMode,
    pub latency: Duration,
    pub outcome: GenerationOutcome,
    pub health: HealthTransition,
}

impl LlmTelemetryEvent {
    fn observe(
        source: LlmExecutionSource,
        mode: FeatureMode,
        started_at: Instant,
        outcome: GenerationOutcome,
    ) -> Self {
        let succeeded = matches!(outcome, GenerationOutcome::Success { .. });
        let health = lock_provider_health().observe(succeeded, Instant::now());

        Self {
            source,
            mode,
            latency: started_at.elapsed(),
            outcome,
            health,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Success { .. })
    }
}

pub async fn complete_with_telemetry(
    llm_gateway: &dyn LlmGateway,
    source: LlmExecutionSource,
    request: LlmGatewayRequest,
) -> (Result<LlmCompletion, LlmGatewayError>, LlmTelemetryEvent) {
    let mode = request.mode;
    let started_at = Instant::now();
    let result = llm_gateway.complete(request).await;

    let outcome = match &result {
        Ok(completion) => GenerationOutcome::Success {
            response_chars: completion.text.chars().count(),
            model: Some(completion.model.clone()),
            usage: completion.usage.clone(),
        },
        Err(err) => failure(err),
    };

    let telemetry = LlmTelemetryEvent::observe(source, mode, started_at, outcome);
    (result, telemetry)
}

/// Telemetry for a streamed completion, recorded once the stream has ended.
/// Streams carry no usage block, so only the relayed length is known.
pub fn stream_telemetry(
    source: LlmExecutionSource,
    mode: FeatureMode,
    started_at: Instant,
    result: Result<&str, &LlmGatewayError>,
) -> LlmTelemetryEvent {
    let outcome = match result {
        Ok(full_text) => GenerationOutcome::Success {
            response_chars: full_text.chars().count(),
            model: None,
            usage: None,
        },
        Err(err) => failure(err),
    };

    LlmTelemetryEvent::observe(source, mode, started_at, outcome)
}

pub fn log_llm_telemetry(request_id: &str, telemetry: &LlmTelemetryEvent) {
    let latency_ms = u64::try_from(telemetry.latency.as_millis()).unwrap_or(u64::MAX);
    let source = telemetry.source.as_str();
    let mode = telemetry.mode.as_str();

    match &telemetry.outcome {
        GenerationOutcome::Success {
            response_chars,
            model,
            usage,
        } => info!(
            metric_name = METRIC_NAME,
            request_id,
            source,
            mode,
            latency_ms,
            response_chars,
            model = model.as_deref().unwrap_or("unknown"),
            prompt_tokens = usage.as_ref().map(|usage| usage.prompt_tokens),
            completion_tokens = usage.as_ref().map(|usage| usage.completion_tokens),
            total_tokens = usage.as_ref().map(|usage| usage.total_tokens),
            "generation succeeded"
        ),
        GenerationOutcome::Failure { error_type } => warn!(
            metric_name = METRIC_NAME,
            request_id,
            source,
            mode,
            latency_ms,
            error_type,
            "generation failed"
        ),
    }

    match telemetry.health {
        HealthTransition::Steady => {}
        HealthTransition::Degraded {
            consecutive_failures,
            failing_for,
        } => warn!(
            metric_name = HEALTH_METRIC_NAME,
            request_id,
            consecutive_failures,
            failing_for_seconds = failing_for.as_secs(),
            "completion provider degraded"
        ),
        HealthTransition::Recovered => info!(
            metric_name = HEALTH_METRIC_NAME,
            request_id, "completion provider recovered"
        ),
    }
}

fn failure(err: &LlmGatewayError) -> GenerationOutcome {
    let error_type = match err {
        LlmGatewayError::Timeout => "timeout",
        LlmGatewayError::ProviderFailure(_) => "provider_failure",
        LlmGatewayError::InvalidProviderPayload(_) => "invalid_provider_payload",
    };
    GenerationOutcome::Failure { error_type }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Steady,
    Degraded {
        consecutive_failures: u32,
        failing_for: Duration,
    },
    Recovered,
}

/// Declares the provider degraded once failures have been both numerous and
/// sustained; reports each degradation and recovery once.
#[derive(Debug)]
struct ProviderHealth {
    failure_threshold: u32,
    duration_threshold: Duration,
    consecutive_failures: u32,
    failing_since: Option<Instant>,
    degraded: bool,
}

impl ProviderHealth {
    fn new(failure_threshold: u32, duration_threshold: Duration) -> Self {
        Self {
            failure_threshold,
            duration_threshold,
            consecutive_failures: 0,
            failing_since: None,
            degraded: false,
        }
    }

    fn observe(&mut self, succeeded: bool, now: Instant) -> HealthTransition {
        if succeeded {
            let was_degraded = self.degraded;
            self.consecutive_failures = 0;
            self.failing_since = None;
            self.degraded = false;
            return if was_degraded {
                HealthTransition::Recovered
            } else {
                HealthTransition::Steady
            };
        }

        let failing_since = *self.failing_since.get_or_insert(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let failing_for = now.saturating_duration_since(failing_since);

        if self.degraded
            || self.consecutive_failures < self.failure_threshold
            || failing_for < self.duration_threshold
        {
            return HealthTransition::Steady;
        }

        self.degraded = true;
        HealthTransition::Degraded {
            consecutive_failures: self.consecutive_failures,
            failing_for,
        }
    }
}

fn lock_provider_health() -> MutexGuard<'static, ProviderHealth> {
    match PROVIDER_HEALTH.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
