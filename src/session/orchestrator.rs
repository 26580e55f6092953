//! Sequences a feedback plan's ranked criteria against their providers.
//!
//! Criteria run strictly one at a time in rank order — the event stream's
//! non-interleaving contract makes concurrency across criteria pointless.
//! One criterion failing is recorded and the run moves on; only
//! configuration problems (caught before any provider call) abort a run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::recorder::SessionRecorder;
use super::stream::StreamMultiplexer;
use super::{CriterionResult, CriterionStatus, FailureKind, FeedbackSession, status_of};
use crate::catalog::{CatalogSnapshot, CriterionSpec, FeedbackPlan, ModelSettings, ProviderSettings};
use crate::error::{ConfigError, StreamError};
use crate::prompt;
use crate::providers::{FailoverError, FailoverInvoker, Generation, TokenSink};

/// One active criterion with its references resolved against the snapshot.
pub struct ResolvedCriterion {
    pub id: Uuid,
    pub title: String,
    pub rank: u32,
    pub prompt: String,
    pub model: Arc<ModelSettings>,
    pub provider: Arc<ProviderSettings>,
}

/// Resolve a plan's active criteria up front. Any dangling reference — or an
/// empty active set — aborts here, before a single stream event or provider
/// call.
pub fn resolve_plan(
    snapshot: &CatalogSnapshot,
    plan: &FeedbackPlan,
) -> Result<Vec<ResolvedCriterion>, ConfigError> {
    let active: Vec<&CriterionSpec> = plan.active_criteria().collect();
    if active.is_empty() {
        return Err(ConfigError::NoActiveCriteria(plan.id));
    }

    let mut resolved = Vec::with_capacity(active.len());
    for criterion in active {
        let (model, provider) = snapshot.resolve_criterion_model(criterion)?;
        resolved.push(ResolvedCriterion {
            id: criterion.id,
            title: criterion.title.clone(),
            rank: criterion.rank,
            prompt: criterion.prompt.clone(),
            model,
            provider,
        });
    }
    Ok(resolved)
}

/// Forwards one criterion's deltas into the shared event stream.
struct RankSink<'a> {
    mux: &'a mut StreamMultiplexer,
    rank: u32,
}

#[async_trait]
impl TokenSink for RankSink<'_> {
    async fn accept(&mut self, text: &str) -> Result<(), StreamError> {
        self.mux.delta(self.rank, text).await
    }
}

fn success_result(criterion: &ResolvedCriterion, generation: Generation) -> CriterionResult {
    CriterionResult {
        rank: criterion.rank,
        criterion_id: criterion.id,
        title: criterion.title.clone(),
        status: CriterionStatus::Success,
        text: Some(generation.text),
        error_kind: None,
        model_name: Some(criterion.model.model_name.clone()),
        served_by: Some(generation.served_by),
        usage: generation.usage,
    }
}

fn failure_result(criterion: &ResolvedCriterion, kind: FailureKind) -> CriterionResult {
    CriterionResult {
        rank: criterion.rank,
        criterion_id: criterion.id,
        title: criterion.title.clone(),
        status: CriterionStatus::Error,
        text: None,
        error_kind: Some(kind),
        model_name: Some(criterion.model.model_name.clone()),
        served_by: None,
        usage: None,
    }
}

/// Run one feedback session to completion and record it.
///
/// Always returns the assembled session, even when the client disconnected
/// mid-run — in that case it holds whatever criteria finished beforehand and
/// the recorder is still invoked, so a session is never left unrecorded.
pub async fn run_session(
    plan: &FeedbackPlan,
    criteria: &[ResolvedCriterion],
    correlation_id: Uuid,
    submission: &str,
    mut mux: StreamMultiplexer,
    recorder: &SessionRecorder,
) -> FeedbackSession {
    // One invoker per distinct provider, built once per run.
    let mut invokers: HashMap<&str, FailoverInvoker> = HashMap::new();
    for criterion in criteria {
        invokers
            .entry(criterion.provider.id.as_str())
            .or_insert_with(|| FailoverInvoker::new(criterion.provider.failover_spec()));
    }

    let context = plan.prompt_context(submission);
    let mut results: Vec<CriterionResult> = Vec::with_capacity(criteria.len());
    let mut cancelled = false;

    'criteria: for criterion in criteria {
        tracing::info!(
            rank = criterion.rank,
            criterion = %criterion.id,
            model = %criterion.model.id,
            provider = %criterion.provider.id,
            "Generating criterion feedback"
        );

        let system_prompt = match prompt::render(&criterion.prompt, &context) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::warn!(rank = criterion.rank, %error, "Criterion template failed");
                results.push(failure_result(criterion, FailureKind::Template));
                match mux.criterion_error(criterion.rank, FailureKind::Template).await {
                    Ok(()) => continue 'criteria,
                    Err(StreamError::Closed) => {
                        cancelled = true;
                        break 'criteria;
                    }
                }
            }
        };

        let invocation = {
            let mut sink = RankSink {
                mux: &mut mux,
                rank: criterion.rank,
            };
            invokers[criterion.provider.id.as_str()]
                .invoke(
                    &criterion.model.model_name,
                    &system_prompt,
                    submission,
                    &mut sink,
                )
                .await
        };

        match invocation {
            Ok(generation) => {
                results.push(success_result(criterion, generation));
                if mux.criterion_complete(criterion.rank).await.is_err() {
                    cancelled = true;
                    break 'criteria;
                }
            }
            Err(FailoverError::Cancelled) => {
                // The in-flight criterion never finished; it gets no result.
                cancelled = true;
                break 'criteria;
            }
            Err(FailoverError::Provider {
                kind,
                endpoint,
                message,
            }) => {
                tracing::warn!(
                    rank = criterion.rank,
                    provider = %criterion.provider.id,
                    endpoint = %endpoint,
                    error = %message,
                    "Criterion feedback failed"
                );
                let failure: FailureKind = kind.into();
                results.push(failure_result(criterion, failure));
                if mux.criterion_error(criterion.rank, failure).await.is_err() {
                    cancelled = true;
                    break 'criteria;
                }
            }
        }
    }

    let status = status_of(&results);
    if cancelled {
        tracing::info!(
            %correlation_id,
            completed = results.len(),
            of = criteria.len(),
            "Client disconnected, recording what completed"
        );
    } else if mux.session_complete(status).await.is_err() {
        tracing::debug!(%correlation_id, "Consumer gone before session_complete");
    }

    let session = FeedbackSession {
        correlation_id,
        feedback_id: plan.id,
        submission: submission.to_string(),
        results,
        status,
        nps_score: None,
        created_at: Utc::now(),
    };

    if let Err(error) = recorder.record(&session).await {
        tracing::error!(%correlation_id, %error, "Failed to record feedback session");
    }

    session
}
