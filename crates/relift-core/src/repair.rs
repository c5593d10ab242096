//! Validate-repair loop: the bounded state machine that turns untrusted
//! generated configuration into a syntactically valid one.
//!
//! ```text
//! Validating ── valid ──────────────→ Valid (terminal)
//!     │ invalid, budget left
//!     ▼
//! Repairing ── regenerated ─────────→ Validating
//!     │
//! Validating ── invalid, budget gone → Failed (terminal)
//! ```
//!
//! Repair policy: an initialization failure regenerates the main document
//! and the variables document together (provider/module errors live in the
//! main document but often need matching variable changes); a structural
//! failure regenerates the main document with the diagnostic embedded.
//! Failed artifacts keep their last documents, diagnostic, and prompt so an
//! operator can finish one application by hand.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::InfraPair;
use crate::client::ResilientClient;
use crate::error::{ReliftError, Result};
use crate::generate;
use crate::prompts;
use crate::validator::{CheckPhase, ConfigValidator, Verdict};

/// States of the validate-repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Validating,
    Repairing,
    /// Terminal: the external checker accepted the documents.
    Valid,
    /// Terminal: the iteration budget was exhausted or a repair failed.
    Failed,
}

impl RepairState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Failed)
    }
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Repairing => write!(f, "repairing"),
            Self::Valid => write!(f, "valid"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Legal edges of the state graph. Terminal states have no exits.
pub fn is_legal_transition(from: RepairState, to: RepairState) -> bool {
    use RepairState::*;
    matches!(
        (from, to),
        (Validating, Valid) | (Validating, Repairing) | (Validating, Failed)
            | (Repairing, Validating)
            | (Repairing, Failed)
    )
}

fn advance(from: RepairState, to: RepairState) -> RepairState {
    debug_assert!(is_legal_transition(from, to), "{from} → {to}");
    debug!(%from, %to, "repair state transition");
    to
}

/// The bounded validate-repair loop over one infrastructure document pair.
pub struct ValidateRepairLoop<'a> {
    client: &'a ResilientClient,
    validator: &'a dyn ConfigValidator,
    max_iterations: u32,
}

impl<'a> ValidateRepairLoop<'a> {
    pub fn new(
        client: &'a ResilientClient,
        validator: &'a dyn ConfigValidator,
        max_iterations: u32,
    ) -> Self {
        Self {
            client,
            validator,
            max_iterations,
        }
    }

    /// Drive `pair` to a terminal status. Returns the number of repair
    /// calls performed. Exhausting the budget returns
    /// [`ReliftError::ExhaustedRepairIterations`] *after* freezing the pair
    /// as `Failed` with its last documents and diagnostic — the best-effort
    /// result is never discarded.
    pub async fn run(&self, pair: &mut InfraPair, cancel: &CancellationToken) -> Result<u32> {
        let app = pair.app_name().to_owned();
        let mut state = RepairState::Validating;
        let mut repairs = 0u32;

        loop {
            debug!(%app, repairs, "validating candidate documents");
            let verdict = match self
                .validator
                .validate(&pair.main.content, &pair.variables.content, cancel)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    freeze_failed(pair, &e.to_string());
                    return Err(e);
                }
            };

            match verdict {
                Verdict::Valid => {
                    state = advance(state, RepairState::Valid);
                    freeze_valid(pair);
                    info!(%app, repairs, "configuration validated");
                    debug_assert!(state.is_terminal());
                    return Ok(repairs);
                }
                Verdict::Invalid { phase, diagnostic } => {
                    if repairs >= self.max_iterations {
                        advance(state, RepairState::Failed);
                        warn!(
                            %app,
                            repairs,
                            "repair budget exhausted, keeping last documents"
                        );
                        freeze_failed(pair, &diagnostic);
                        return Err(ReliftError::ExhaustedRepairIterations {
                            iterations: repairs,
                            last_diagnostic: diagnostic,
                        });
                    }

                    state = advance(state, RepairState::Repairing);
                    info!(%app, %phase, repairs, "requesting repair");
                    if let Err(e) = self.repair(pair, phase, &diagnostic, cancel).await {
                        advance(state, RepairState::Failed);
                        freeze_failed(pair, &e.to_string());
                        return Err(e);
                    }
                    repairs += 1;
                    state = advance(state, RepairState::Validating);
                }
            }
        }
    }

    async fn repair(
        &self,
        pair: &mut InfraPair,
        phase: CheckPhase,
        diagnostic: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match phase {
            CheckPhase::Init => {
                let prompt = prompts::init_repair_prompt(
                    &pair.main.content,
                    &pair.variables.content,
                    diagnostic,
                );
                let response = self.client.invoke(&prompt, cancel).await?;
                let (main, variables) = generate::parse_repair_sections(&response)?;
                // The pair is pending here by construction; the artifact
                // type rejects writes only once frozen.
                let _ = pair.main.set_content(main, prompt.as_str());
                let _ = pair.variables.set_content(variables, prompt.as_str());
            }
            CheckPhase::Structural => {
                let prompt = prompts::structural_repair_prompt(&pair.main.content, diagnostic);
                let response = self.client.invoke(&prompt, cancel).await?;
                let corrected = response.trim();
                if corrected.is_empty() {
                    return Err(ReliftError::Parse("empty repair response".into()));
                }
                let _ = pair.main.set_content(corrected, prompt.as_str());
            }
        }
        Ok(())
    }
}

fn freeze_valid(pair: &mut InfraPair) {
    let _ = pair.main.mark_valid();
    let _ = pair.variables.mark_valid();
}

fn freeze_failed(pair: &mut InfraPair, diagnostic: &str) {
    let _ = pair.main.mark_failed(diagnostic);
    let _ = pair.variables.mark_failed(diagnostic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::artifact::ArtifactStatus;
    use crate::config::ClientConfig;
    use crate::service::GenerationService;

    struct ScriptedValidator {
        verdicts: Mutex<Vec<Verdict>>,
        calls: AtomicU32,
    }

    impl ScriptedValidator {
        fn new(verdicts: Vec<Verdict>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
                calls: AtomicU32::new(0),
            }
        }

        fn invalid(phase: CheckPhase, n: usize) -> Vec<Verdict> {
            std::iter::repeat_with(|| Verdict::Invalid {
                phase,
                diagnostic: format!("{phase} rejected the documents"),
            })
            .take(n)
            .collect()
        }
    }

    #[async_trait]
    impl ConfigValidator for ScriptedValidator {
        async fn validate(
            &self,
            _main: &str,
            _variables: &str,
            _cancel: &CancellationToken,
        ) -> Result<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut verdicts = self.verdicts.lock().unwrap();
            if verdicts.is_empty() {
                Ok(Verdict::Valid)
            } else {
                Ok(verdicts.remove(0))
            }
        }
    }

    struct ScriptedService {
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedService {
        fn new(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("fixed main document".into())
            } else {
                responses.remove(0)
            }
        }
    }

    fn client(service: Arc<ScriptedService>) -> ResilientClient {
        ResilientClient::new(
            service,
            ClientConfig {
                max_requests_per_period: 1000,
                refill_period: Duration::from_secs(60),
                max_retries: 3,
                initial_retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(10),
                max_parallel_requests: 4,
            },
        )
    }

    fn pending_pair() -> InfraPair {
        let mut pair = InfraPair::new("app-b");
        let _ = pair.main.set_content("draft main", "draft prompt");
        let _ = pair.variables.set_content("draft variables", "draft prompt");
        pair
    }

    #[tokio::test]
    async fn two_invalid_then_valid_means_two_repairs() {
        let validator = ScriptedValidator::new(ScriptedValidator::invalid(CheckPhase::Structural, 2));
        let service = ScriptedService::new(vec![
            Ok("first fix".into()),
            Ok("second fix".into()),
        ]);
        let client = client(service.clone());
        let looper = ValidateRepairLoop::new(&client, &validator, 10);

        let mut pair = pending_pair();
        let repairs = looper
            .run(&mut pair, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(repairs, 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(pair.main.status(), &ArtifactStatus::Valid);
        assert_eq!(pair.variables.status(), &ArtifactStatus::Valid);
        // The third validation saw the second repair's document.
        assert_eq!(pair.main.content, "second fix");
    }

    #[tokio::test]
    async fn budget_exhaustion_fails_after_exactly_k_repairs() {
        let k = 4;
        let validator = ScriptedValidator::new(ScriptedValidator::invalid(
            CheckPhase::Structural,
            (k + 1) as usize,
        ));
        let service = ScriptedService::new(Vec::new());
        let client = client(service.clone());
        let looper = ValidateRepairLoop::new(&client, &validator, k);

        let mut pair = pending_pair();
        let err = looper
            .run(&mut pair, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(service.calls.load(Ordering::SeqCst), k);
        match err {
            ReliftError::ExhaustedRepairIterations {
                iterations,
                last_diagnostic,
            } => {
                assert_eq!(iterations, k);
                assert!(last_diagnostic.contains("rejected"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Last attempted documents survive for operator inspection.
        assert!(matches!(pair.main.status(), ArtifactStatus::Failed { .. }));
        assert_eq!(pair.main.content, "fixed main document");
    }

    #[tokio::test]
    async fn init_failure_regenerates_both_documents() {
        let validator = ScriptedValidator::new(ScriptedValidator::invalid(CheckPhase::Init, 1));
        let service = ScriptedService::new(vec![Ok(format!(
            "{}\nrepaired main\n{}\nrepaired variables",
            prompts::MAIN_SECTION_MARKER,
            prompts::VARIABLES_SECTION_MARKER
        ))]);
        let client = client(service);
        let looper = ValidateRepairLoop::new(&client, &validator, 10);

        let mut pair = pending_pair();
        let repairs = looper
            .run(&mut pair, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(repairs, 1);
        assert_eq!(pair.main.content, "repaired main");
        assert_eq!(pair.variables.content, "repaired variables");
        // The repair prompt embedded the pre-repair documents.
        assert!(pair.main.last_prompt.contains("draft main"));
        assert!(pair.main.last_prompt.contains("draft variables"));
    }

    #[tokio::test]
    async fn structural_failure_regenerates_only_main() {
        let validator =
            ScriptedValidator::new(ScriptedValidator::invalid(CheckPhase::Structural, 1));
        let service = ScriptedService::new(vec![Ok("only main replaced".into())]);
        let client = client(service);
        let looper = ValidateRepairLoop::new(&client, &validator, 10);

        let mut pair = pending_pair();
        looper
            .run(&mut pair, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(pair.main.content, "only main replaced");
        assert_eq!(pair.variables.content, "draft variables");
    }

    #[tokio::test]
    async fn client_failure_during_repair_is_fatal_for_the_artifact() {
        let validator =
            ScriptedValidator::new(ScriptedValidator::invalid(CheckPhase::Structural, 1));
        let service = ScriptedService::new(vec![Err(ReliftError::PermanentService(
            "401 unauthorized".into(),
        ))]);
        let client = client(service);
        let looper = ValidateRepairLoop::new(&client, &validator, 10);

        let mut pair = pending_pair();
        let err = looper
            .run(&mut pair, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReliftError::PermanentService(_)));
        assert!(matches!(pair.main.status(), ArtifactStatus::Failed { .. }));
        // Pre-repair content is retained.
        assert_eq!(pair.main.content, "draft main");
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use RepairState::*;
        for to in [Validating, Repairing, Valid, Failed] {
            assert!(!is_legal_transition(Valid, to));
            assert!(!is_legal_transition(Failed, to));
        }
        assert!(is_legal_transition(Validating, Repairing));
        assert!(is_legal_transition(Repairing, Validating));
        assert!(!is_legal_transition(Repairing, Valid));
    }
}
