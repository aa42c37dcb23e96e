//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes Effects contained in a Plan in order,
//! collecting the results. This is where side effects actually occur.

use std::time::Duration;

use log::{debug, info, warn};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Bindings, Resource, ResourceId, State};

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete succeeded
    Deleted { id: ResourceId },
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

/// Result of executing the entire Plan
#[derive(Debug)]
pub struct ApplyResult {
    pub outcomes: Vec<Result<EffectOutcome, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// Interpreter configuration
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
    /// Extra attempts for effects failing with a retryable error
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            continue_on_error: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a Plan, interpreting all Effects and causing side effects
    ///
    /// `bindings` holds the attributes of resources that already exist; it is
    /// updated as effects complete so later effects can resolve references to
    /// resources created earlier in the same run.
    pub async fn apply(&self, plan: &Plan, mut bindings: Bindings) -> ApplyResult {
        let mut outcomes = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;

        for effect in plan.effects() {
            let result = self.execute_with_retry(effect, &bindings).await;

            match &result {
                Ok(EffectOutcome::Created { state }) | Ok(EffectOutcome::Updated { state }) => {
                    bindings.insert(state.id.address(), state.binding_attributes());
                    success_count += 1;
                }
                Ok(EffectOutcome::Deleted { id }) => {
                    bindings.remove(&id.address());
                    success_count += 1;
                }
                Ok(EffectOutcome::Skipped { .. }) => success_count += 1,
                Err(e) => {
                    warn!("{} of {} failed: {}", effect.kind(), effect.resource_id(), e);
                    failure_count += 1;
                    if !self.config.continue_on_error {
                        outcomes.push(result);
                        break;
                    }
                }
            }

            outcomes.push(result);
        }

        ApplyResult {
            outcomes,
            success_count,
            failure_count,
        }
    }

    async fn execute_with_retry(
        &self,
        effect: &Effect,
        bindings: &Bindings,
    ) -> ProviderResult<EffectOutcome> {
        let mut attempt = 0;
        loop {
            match self.execute_effect(effect, bindings).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} of {} failed ({}), retrying {}/{}",
                        effect.kind(),
                        effect.resource_id(),
                        e,
                        attempt,
                        self.config.max_retries
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                other => return other,
            }
        }
    }

    /// Execute a single Effect
    async fn execute_effect(
        &self,
        effect: &Effect,
        bindings: &Bindings,
    ) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        match effect {
            Effect::Create(resource) => {
                let resolved = resolve_for_provider(resource, bindings)?;
                debug!("creating {}", resource.id);
                let state = self.provider.create(&resolved).await?;
                info!(
                    "created {} ({})",
                    resource.id,
                    state.identifier.as_deref().unwrap_or("-")
                );
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to, .. } => {
                let resolved = resolve_for_provider(to, bindings)?;
                let identifier = from.identifier.as_deref().ok_or_else(|| {
                    ProviderError::new("no identifier recorded for update").for_resource(id.clone())
                })?;
                debug!("updating {} ({})", id, identifier);
                let mut state = self.provider.update(id, identifier, from, &resolved).await?;
                if state.identifier.is_none() {
                    state.identifier = Some(identifier.to_string());
                }
                info!("updated {} ({})", id, identifier);
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Delete { id, identifier } => {
                debug!("deleting {} ({})", id, identifier);
                self.provider.delete(id, identifier).await?;
                info!("deleted {} ({})", id, identifier);
                Ok(EffectOutcome::Deleted { id: id.clone() })
            }
        }
    }
}

fn resolve_for_provider(resource: &Resource, bindings: &Bindings) -> ProviderResult<Resource> {
    let resolved = resource.resolve(bindings);
    let unresolved = resolved.unresolved_refs();
    if unresolved.is_empty() {
        Ok(resolved)
    } else {
        Err(
            ProviderError::new(format!("unresolved reference: {}", unresolved.join(", ")))
                .for_resource(resource.id.clone()),
        )
    }
}
