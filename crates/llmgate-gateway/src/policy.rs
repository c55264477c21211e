//! Policy evaluation.
//!
//! Two interchangeable [`PolicyEvaluator`] strategies sit behind the same
//! trait: a local rule set evaluated in-process, and delegation to a remote
//! decision service speaking an OPA-style data API. The strategy is chosen
//! once at startup from configuration and never switches per request.
//!
//! Both strategies are fail-closed: a verdict that cannot be produced is a
//! deny. The remote evaluator surfaces backend trouble as
//! [`GatewayError::PolicyUnavailable`] so operators can tell an outage apart
//! from a genuine policy rejection.

use llmgate_core::{
    GatewayError, PolicyConfig, PolicyEvaluator, PolicyMode, PolicyQuery, PolicyVerdict, Result,
    TrustLevel,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Local rules
// ---------------------------------------------------------------------------

/// In-process rule set. Every applicable rule contributes a reason; denial
/// reports all of them, not just the first.
pub struct LocalPolicyEvaluator {
    restricted_model: String,
    max_tokens_limit: u32,
    egress_allowlist: Vec<String>,
}

impl LocalPolicyEvaluator {
    /// Build the local evaluator from configuration.
    pub fn new(config: &PolicyConfig, max_tokens_limit: u32) -> Self {
        Self {
            restricted_model: config.restricted_model.clone(),
            max_tokens_limit,
            egress_allowlist: config.egress_allowlist.clone(),
        }
    }

    fn egress_allowed(&self, url: &str) -> bool {
        self.egress_allowlist
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }
}

#[async_trait::async_trait]
impl PolicyEvaluator for LocalPolicyEvaluator {
    async fn evaluate(&self, query: &PolicyQuery) -> Result<PolicyVerdict> {
        let mut reasons = Vec::new();

        if query.model == self.restricted_model && query.trust_level != TrustLevel::Trusted {
            reasons.push(format!(
                "model '{}' requires a trusted tenant",
                query.model
            ));
        }

        if let Some(max_tokens) = query.max_tokens {
            if max_tokens > self.max_tokens_limit {
                reasons.push(format!(
                    "max_tokens {} exceeds the policy cap of {}",
                    max_tokens, self.max_tokens_limit
                ));
            }
        }

        if let Some(url) = query.egress_url.as_deref() {
            if !self.egress_allowed(url) {
                reasons.push("egress destination is not on the allowlist".to_string());
            }
        }

        if reasons.is_empty() {
            Ok(PolicyVerdict::allow())
        } else {
            Ok(PolicyVerdict::from_reasons(reasons))
        }
    }

    fn mode(&self) -> PolicyMode {
        PolicyMode::Local
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote delegation
// ---------------------------------------------------------------------------

/// Wire request for the remote decision service: `{"input": <query>}`.
#[derive(Debug, Serialize)]
struct RemoteRequest<'a> {
    input: &'a PolicyQuery,
}

/// Wire response: `{"result": [reasons...]}`. An empty array is an allow;
/// a missing result means the policy document did not evaluate, which is
/// indistinguishable from an unavailable backend and treated as such.
#[derive(Debug, Deserialize)]
struct RemoteResponse {
    result: Option<Vec<String>>,
}

/// Delegates verdicts to an external decision service over HTTP.
pub struct RemotePolicyEvaluator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RemotePolicyEvaluator {
    /// Build the remote evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self> {
        let timeout = Duration::from_millis(timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("policy http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl PolicyEvaluator for RemotePolicyEvaluator {
    async fn evaluate(&self, query: &PolicyQuery) -> Result<PolicyVerdict> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&RemoteRequest { input: query })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "policy backend unreachable");
                GatewayError::PolicyUnavailable(format!("decision service unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::PolicyUnavailable(format!(
                "decision service returned {}",
                response.status()
            )));
        }

        let body: RemoteResponse = response.json().await.map_err(|e| {
            GatewayError::PolicyUnavailable(format!("malformed decision response: {e}"))
        })?;

        match body.result {
            Some(reasons) if reasons.is_empty() => Ok(PolicyVerdict::allow()),
            Some(reasons) => Ok(PolicyVerdict::from_reasons(reasons)),
            None => Err(GatewayError::PolicyUnavailable(
                "decision service returned no result".to_string(),
            )),
        }
    }

    fn mode(&self) -> PolicyMode {
        PolicyMode::Remote
    }

    async fn health_check(&self) -> Result<()> {
        // Any HTTP response counts as reachable; the probe checks the
        // network path, not the policy document.
        self.client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::PolicyUnavailable(format!("decision service: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Select the policy strategy from configuration: remote when a decision
/// service URL is configured, local rules otherwise.
pub fn build_policy_evaluator(
    config: &PolicyConfig,
    max_tokens_limit: u32,
) -> Result<Arc<dyn PolicyEvaluator>> {
    match config.remote_url.as_deref() {
        Some(url) => Ok(Arc::new(RemotePolicyEvaluator::new(
            url,
            config.remote_timeout_ms,
        )?)),
        None => Ok(Arc::new(LocalPolicyEvaluator::new(
            config,
            max_tokens_limit,
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
