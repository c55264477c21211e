//! Core types, traits, and errors for llmgate
//!
//! This crate contains the foundational types shared across all llmgate
//! components: the request/response data model, the policy and rate-limit
//! contracts, the immutable gateway configuration, and the error taxonomy
//! that maps onto the gateway's HTTP outcomes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Trust level assigned to a tenant at identity resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Development identity resolved from the literal dev token.
    Dev,
    /// Tenant present in the configured trusted-tenants set.
    Trusted,
    /// Any other authenticated tenant.
    Standard,
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Trusted => write!(f, "trusted"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// The caller identity derived from a bearer credential.
///
/// Produced once per request by the identity resolver and threaded through
/// the pipeline; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentity {
    /// Logical tenant identifier (JWT subject or the reserved dev tenant).
    pub tenant_id: String,
    /// Trust level derived from configuration.
    pub trust_level: TrustLevel,
}

impl TenantIdentity {
    /// Reserved tenant id mapped from the development token.
    pub const DEV_TENANT: &'static str = "dev-tenant";

    /// Identity for the development token.
    #[must_use]
    pub fn dev() -> Self {
        Self {
            tenant_id: Self::DEV_TENANT.to_string(),
            trust_level: TrustLevel::Dev,
        }
    }
}

// ---------------------------------------------------------------------------
// Request types (OpenAI-compatible subset)
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role: `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// One retrieval chunk attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Caller-assigned chunk identifier.
    pub id: String,
    /// Untrusted chunk text.
    pub content: String,
}

/// Untrusted retrieval-augmented context attached to a chat request.
///
/// The `source` field is the trust boundary: it must match a configured
/// origin prefix before any chunk content is considered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInput {
    /// URI-like origin of the retrieval content.
    #[serde(default)]
    pub source: String,
    /// Ordered retrieval chunks.
    #[serde(default)]
    pub chunks: Vec<ContextChunk>,
}

/// An inbound chat completion request. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model name.
    #[serde(default)]
    pub model: String,
    /// Ordered conversation messages.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Optional completion token budget.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Optional retrieval context, screened by the context firewall.
    #[serde(default)]
    pub context: Option<ContextInput>,
}

// ---------------------------------------------------------------------------
// Context firewall verdict
// ---------------------------------------------------------------------------

/// The context firewall's verdict over a [`ContextInput`].
///
/// Derived from the input, never mutating it. `accepted` is `false` whenever
/// the origin check fails or `risk_score` exceeds the configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedContext {
    /// Origin carried over from the input.
    pub source: String,
    /// Chunks carried over unchanged (low-risk content passes verbatim).
    pub chunks: Vec<ContextChunk>,
    /// Additive risk score accumulated over chunks and user messages.
    pub risk_score: u32,
    /// Whether the context may accompany the provider call.
    pub accepted: bool,
}

// ---------------------------------------------------------------------------
// Policy types
// ---------------------------------------------------------------------------

/// Which policy evaluation strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// In-process rule evaluation.
    Local,
    /// Delegation to an external decision service.
    Remote,
}

impl std::fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// The minimal fact set sent to policy evaluation.
///
/// Deliberately excludes message and context content: policy decisions are
/// made on request metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyQuery {
    /// Tenant the request is authenticated as.
    pub tenant_id: String,
    /// Trust level of that tenant.
    pub trust_level: TrustLevel,
    /// Requested model.
    pub model: String,
    /// Requested token budget, if any.
    pub max_tokens: Option<u32>,
    /// Outbound egress target, if the request names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_url: Option<String>,
}

/// Allow/deny outcome of policy evaluation.
///
/// Invariant: `reasons` is non-empty exactly when `allowed` is `false`.
/// Use [`PolicyVerdict::allow`] and [`PolicyVerdict::deny`] to uphold it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Every applicable deny reason (empty when allowed).
    pub reasons: Vec<String>,
}

impl PolicyVerdict {
    /// An allowing verdict with no reasons.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
        }
    }

    /// A verdict derived from accumulated deny reasons; empty reasons allow.
    #[must_use]
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            allowed: reasons.is_empty(),
            reasons,
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Raw result of a provider completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Unsanitized answer text.
    pub answer: String,
    /// Provenance citations reported by the provider.
    pub citations: Vec<String>,
}

/// Metadata attached to a gateway response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Name of the provider adapter that produced the answer.
    pub provider: String,
}

/// The sanitized result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Answer text after redaction.
    pub answer: String,
    /// Ordered citations.
    pub citations: Vec<String>,
    /// Response metadata.
    pub meta: ResponseMeta,
}

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Immutable gateway configuration, loaded once at startup and threaded
/// explicitly through component constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address and port to bind the gateway to.
    pub listen_addr: String,
    /// Identity resolution settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Request validation limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Context firewall settings.
    #[serde(default)]
    pub firewall: FirewallConfig,
    /// Policy engine settings.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Upstream provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            firewall: FirewallConfig::default(),
            policy: PolicyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

/// Identity resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for HS256 token verification (`None` disables signed
    /// tokens; only the dev token can then authenticate).
    pub jwt_secret: Option<String>,
    /// Accept the literal development token. Must be off in production.
    pub allow_dev_token: bool,
    /// Tenant ids granted [`TrustLevel::Trusted`].
    pub trusted_tenants: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            allow_dev_token: true,
            trusted_tenants: Vec::new(),
        }
    }
}

/// Structural and size limits enforced by the request validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Models that exist for this deployment (existence, not authorization).
    pub allowed_models: Vec<String>,
    /// Maximum number of messages per request (inclusive).
    pub max_messages: usize,
    /// Maximum characters in a single message content.
    pub max_message_chars: usize,
    /// Maximum characters summed over all message contents.
    pub max_total_chars: usize,
    /// Cap on the requested completion token budget.
    pub max_tokens_limit: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            allowed_models: vec![
                "stub".to_string(),
                "openai:gpt-4o".to_string(),
                "openai:gpt-4o-mini".to_string(),
            ],
            max_messages: 50,
            max_message_chars: 4000,
            max_total_chars: 8000,
            max_tokens_limit: 2048,
        }
    }
}

/// Context firewall configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Origin prefixes a context `source` must start with. An empty list
    /// rejects every context that carries a source.
    pub allowed_origins: Vec<String>,
    /// Maximum tolerated additive risk score.
    pub risk_threshold: u32,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["kb://".to_string()],
            risk_threshold: 4,
        }
    }
}

/// Policy engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Remote decision service endpoint. Absence selects the local evaluator.
    pub remote_url: Option<String>,
    /// Timeout for the remote decision call.
    pub remote_timeout_ms: u64,
    /// High-cost model denied to anyone below [`TrustLevel::Trusted`].
    pub restricted_model: String,
    /// Prefixes an `egress_url` must match. Empty denies all explicit egress.
    pub egress_allowlist: Vec<String>,
    /// Egress target attached to every policy query, if this deployment
    /// forwards answers anywhere (`None` for most deployments).
    pub default_egress_url: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_timeout_ms: 8000,
            restricted_model: "openai:gpt-4o".to_string(),
            egress_allowlist: Vec::new(),
            default_egress_url: None,
        }
    }
}

/// Rate limiter configuration (fixed-window admission control).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable admission control. Disabled means every request admits.
    pub enabled: bool,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Admissions allowed per key per window.
    pub max_requests: u64,
    /// Shared store address. Absence selects process-local counters.
    pub redis_url: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 1,
            max_requests: 5,
            redis_url: None,
        }
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible upstream.
    pub upstream_url: String,
    /// Upstream API key. Absence routes `openai:` models to the stub.
    pub api_key: Option<String>,
    /// Provider call timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            upstream_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_ms: 30000,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `LLMGATE_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is set but unparseable.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            listen_addr: env_string("LLMGATE_LISTEN_ADDR", &defaults.listen_addr),
            auth: AuthConfig {
                jwt_secret: env_opt("LLMGATE_JWT_SECRET"),
                allow_dev_token: env_bool("LLMGATE_ALLOW_DEV_TOKEN", defaults.auth.allow_dev_token)?,
                trusted_tenants: env_list("LLMGATE_TRUSTED_TENANTS"),
            },
            limits: LimitsConfig {
                allowed_models: env_list_or("LLMGATE_ALLOWED_MODELS", defaults.limits.allowed_models),
                max_messages: env_parse("LLMGATE_MAX_MESSAGES", defaults.limits.max_messages)?,
                max_message_chars: env_parse(
                    "LLMGATE_MAX_MESSAGE_CHARS",
                    defaults.limits.max_message_chars,
                )?,
                max_total_chars: env_parse(
                    "LLMGATE_MAX_TOTAL_CHARS",
                    defaults.limits.max_total_chars,
                )?,
                max_tokens_limit: env_parse(
                    "LLMGATE_MAX_TOKENS_LIMIT",
                    defaults.limits.max_tokens_limit,
                )?,
            },
            firewall: FirewallConfig {
                allowed_origins: env_list_or(
                    "LLMGATE_ALLOWED_CONTEXT_ORIGINS",
                    defaults.firewall.allowed_origins,
                ),
                risk_threshold: env_parse(
                    "LLMGATE_CONTEXT_RISK_THRESHOLD",
                    defaults.firewall.risk_threshold,
                )?,
            },
            policy: PolicyConfig {
                remote_url: env_opt("LLMGATE_POLICY_URL"),
                remote_timeout_ms: env_parse(
                    "LLMGATE_POLICY_TIMEOUT_MS",
                    defaults.policy.remote_timeout_ms,
                )?,
                restricted_model: env_string(
                    "LLMGATE_RESTRICTED_MODEL",
                    &defaults.policy.restricted_model,
                ),
                egress_allowlist: env_list("LLMGATE_EGRESS_ALLOWLIST"),
                default_egress_url: env_opt("LLMGATE_DEFAULT_EGRESS_URL"),
            },
            rate_limit: RateLimitConfig {
                enabled: env_bool("LLMGATE_RATE_LIMIT_ENABLED", defaults.rate_limit.enabled)?,
                window_seconds: env_parse(
                    "LLMGATE_RATE_LIMIT_WINDOW_SECS",
                    defaults.rate_limit.window_seconds,
                )?,
                max_requests: env_parse(
                    "LLMGATE_RATE_LIMIT_MAX_REQUESTS",
                    defaults.rate_limit.max_requests,
                )?,
                redis_url: env_opt("LLMGATE_REDIS_URL"),
            },
            provider: ProviderConfig {
                upstream_url: env_string("LLMGATE_UPSTREAM_URL", &defaults.provider.upstream_url),
                api_key: env_opt("LLMGATE_UPSTREAM_API_KEY"),
                timeout_ms: env_parse("LLMGATE_UPSTREAM_TIMEOUT_MS", defaults.provider.timeout_ms)?,
            },
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_string(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Comma-separated list; unset or empty yields an empty vec.
fn env_list(name: &str) -> Vec<String> {
    env_opt(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Comma-separated list with a non-empty default when unset.
fn env_list_or(name: &str, default: Vec<String>) -> Vec<String> {
    match env_opt(name) {
        Some(_) => env_list(name),
        None => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Config(format!("{name} is not a valid number: {raw}"))),
        None => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env_opt(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(GatewayError::Config(format!(
                "{name} is not a valid boolean: {other}"
            ))),
        },
        None => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Gateway error taxonomy.
///
/// Every security-relevant rejection is terminal for its request and carries
/// a machine-distinguishable kind. Variants never embed raw request content,
/// so an injected payload cannot be reflected back to the caller.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    /// Missing, invalid, or expired credential.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Request shape, size, count, or token-cap violation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Context origin or risk-score failure.
    #[error("Context rejected: {0}")]
    ContextRejected(String),

    /// One or more policy deny reasons.
    #[error("Policy denied: {}", reasons.join("; "))]
    PolicyDenied {
        /// Every applicable deny reason.
        reasons: Vec<String>,
    },

    /// Remote policy evaluator unreachable — treated as a deny (fail-closed)
    /// but surfaced distinctly so operators can tell outage from rejection.
    #[error("Policy backend unavailable: {0}")]
    PolicyUnavailable(String),

    /// Admission-control rejection.
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds until the current window rolls over.
        retry_after_secs: u64,
    },

    /// Opaque upstream failure; not a security rejection and the only class
    /// eligible for retry at a layer above this core.
    #[error("Provider failure: {0}")]
    Provider(String),

    /// Rate-limit counter store failure. Fail-closed: the request whose
    /// counter could not be read is rejected, never admitted unchecked.
    #[error("Rate-limit store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Stable machine-readable kind for error bodies and test assertions.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ContextRejected(_) => "context_rejected",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::PolicyUnavailable(_) => "policy_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::Provider(_) => "provider_failure",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
        }
    }
}

/// Convenience alias for `std::result::Result<T, GatewayError>`.
pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Pipeline seams (strategy traits)
// ---------------------------------------------------------------------------

/// Policy evaluation strategy: local rules or remote delegation, selected
/// once at startup by configuration presence.
#[async_trait::async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate a query into a verdict carrying every applicable reason.
    ///
    /// Returns [`GatewayError::PolicyUnavailable`] when the backend cannot
    /// answer; callers must treat that as a deny.
    async fn evaluate(&self, query: &PolicyQuery) -> Result<PolicyVerdict>;

    /// Which strategy this evaluator implements.
    fn mode(&self) -> PolicyMode;

    /// Whether the backend is currently reachable (readiness probe).
    async fn health_check(&self) -> Result<()>;
}

/// Key→counter store backing the rate limiter.
///
/// `incr` must be atomic per key: concurrent calls for the same key must
/// observe distinct, monotonically increasing counts.
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter at `key`, creating it with the given TTL, and
    /// return the post-increment count.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Whether the store is currently reachable.
    async fn health_check(&self) -> Result<()>;
}

/// The opaque provider call: `(model, messages, max_tokens) -> completion`.
///
/// Swappable for a deterministic stub in tests.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run a completion against the upstream.
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<Completion>;

    /// Adapter name reported in response metadata.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
