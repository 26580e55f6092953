//! Runtime view of the admin-editable configuration: providers, models and
//! feedback plans. Orchestration never reads live config — each run takes an
//! immutable [`CatalogSnapshot`] up front, so concurrent admin edits only
//! affect runs started after the swap.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use url::Url;
use uuid::Uuid;

use crate::config::{Config, normalize_endpoint};
use crate::error::ConfigError;
use crate::prompt::PromptContext;
use crate::providers::{
    EndpointConfig, FailoverSpec, GenerationParams, ProviderKind,
};

// ── Settings types ────────────────────────────────────────────────

/// One configured backend: a primary endpoint and an optional fallback
/// endpoint/credential pair. Read-only once snapshotted.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub id: String,
    pub kind: ProviderKind,
    pub primary_endpoint: Url,
    pub primary_api_key: Option<String>,
    pub fallback_endpoint: Option<Url>,
    pub fallback_api_key: Option<String>,
    pub fallback_enabled: bool,
    pub verify_tls: bool,
    pub request_timeout: Duration,
    pub api_version: Option<String>,
    pub params: GenerationParams,
}

impl ProviderSettings {
    fn endpoint_config(&self, url: Url, api_key: Option<String>) -> EndpointConfig {
        EndpointConfig {
            url,
            api_key,
            verify_tls: self.verify_tls,
            request_timeout: self.request_timeout,
            api_version: self.api_version.clone(),
        }
    }

    pub fn primary_endpoint_config(&self) -> EndpointConfig {
        self.endpoint_config(self.primary_endpoint.clone(), self.primary_api_key.clone())
    }

    pub fn fallback_endpoint_config(&self) -> Option<EndpointConfig> {
        self.fallback_endpoint
            .clone()
            .map(|url| self.endpoint_config(url, self.fallback_api_key.clone()))
    }

    pub fn failover_spec(&self) -> FailoverSpec {
        FailoverSpec {
            provider_id: self.id.clone(),
            kind: self.kind,
            primary: self.primary_endpoint_config(),
            fallback: self.fallback_endpoint_config(),
            fallback_enabled: self.fallback_enabled,
            params: self.params,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub id: String,
    pub provider: String,
    pub model_name: String,
    pub display_name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub title: String,
    pub description: String,
    pub context: String,
}

#[derive(Debug, Clone, Default)]
pub struct CourseContext {
    pub name: String,
    pub context: String,
}

#[derive(Debug, Clone)]
pub struct CriterionSpec {
    pub id: Uuid,
    pub title: String,
    pub rank: u32,
    pub prompt: String,
    pub model: Option<String>,
    pub active: bool,
}

/// The ordered criterion set for one task, plus the context its prompts
/// render against.
#[derive(Debug, Clone)]
pub struct FeedbackPlan {
    pub id: Uuid,
    pub task: TaskContext,
    pub course: CourseContext,
    /// All criteria, sorted by rank at snapshot construction.
    pub criteria: Vec<CriterionSpec>,
}

impl FeedbackPlan {
    pub fn active_criteria(&self) -> impl Iterator<Item = &CriterionSpec> {
        self.criteria.iter().filter(|criterion| criterion.active)
    }

    /// Prompt context for this plan around one submission.
    pub fn prompt_context<'a>(&'a self, submission: &'a str) -> PromptContext<'a> {
        PromptContext {
            submission,
            task_title: &self.task.title,
            task_description: &self.task.description,
            task_context: &self.task.context,
            course_name: &self.course.name,
            course_context: &self.course.context,
        }
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Immutable, validated view of the whole configuration surface.
pub struct CatalogSnapshot {
    providers: HashMap<String, Arc<ProviderSettings>>,
    models: HashMap<String, Arc<ModelSettings>>,
    default_model: Option<String>,
    feedbacks: HashMap<Uuid, Arc<FeedbackPlan>>,
}

impl CatalogSnapshot {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut providers = HashMap::new();
        for provider in &config.providers {
            let primary_endpoint = normalize_endpoint(&provider.primary_endpoint, provider.kind)?;
            let fallback_endpoint = provider
                .fallback_endpoint
                .as_deref()
                .map(|raw| normalize_endpoint(raw, provider.kind))
                .transpose()?;

            if provider.fallback_enabled && fallback_endpoint.is_none() {
                tracing::warn!(
                    provider = %provider.id,
                    "Fallback enabled but no fallback endpoint configured"
                );
            }

            let defaults = GenerationParams::defaults_for(provider.kind);
            let settings = ProviderSettings {
                id: provider.id.clone(),
                kind: provider.kind,
                primary_endpoint,
                primary_api_key: provider.primary_api_key.clone(),
                fallback_endpoint,
                fallback_api_key: provider.fallback_api_key.clone(),
                fallback_enabled: provider.fallback_enabled,
                verify_tls: provider.verify_tls,
                request_timeout: Duration::from_secs(provider.request_timeout_secs),
                api_version: provider.api_version.clone(),
                params: GenerationParams {
                    temperature: provider.temperature.unwrap_or(defaults.temperature),
                    top_p: provider.top_p.unwrap_or(defaults.top_p),
                    max_tokens: provider.max_tokens.or(defaults.max_tokens),
                },
            };

            if providers
                .insert(settings.id.clone(), Arc::new(settings))
                .is_some()
            {
                return Err(ConfigError::Validation(format!(
                    "duplicate provider id {:?}",
                    provider.id
                )));
            }
        }

        let mut models = HashMap::new();
        let mut default_model = None;
        for model in &config.models {
            if !providers.contains_key(&model.provider) {
                return Err(ConfigError::UnknownProvider {
                    model: model.id.clone(),
                    provider: model.provider.clone(),
                });
            }

            if model.is_default {
                if let Some(previous) = default_model.replace(model.id.clone()) {
                    return Err(ConfigError::Validation(format!(
                        "both {previous:?} and {:?} are marked as default model",
                        model.id
                    )));
                }
            }

            let settings = ModelSettings {
                id: model.id.clone(),
                provider: model.provider.clone(),
                model_name: model.model_name.clone(),
                display_name: model
                    .display_name
                    .clone()
                    .unwrap_or_else(|| model.model_name.clone()),
                is_default: model.is_default,
            };

            if models.insert(settings.id.clone(), Arc::new(settings)).is_some() {
                return Err(ConfigError::Validation(format!(
                    "duplicate model id {:?}",
                    model.id
                )));
            }
        }

        let mut feedbacks = HashMap::new();
        for feedback in &config.feedbacks {
            let mut criteria: Vec<CriterionSpec> = feedback
                .criteria
                .iter()
                .map(|criterion| CriterionSpec {
                    id: criterion.id,
                    title: criterion.title.clone(),
                    rank: criterion.rank,
                    prompt: criterion.prompt.clone(),
                    model: criterion.model.clone(),
                    active: criterion.active,
                })
                .collect();
            criteria.sort_by_key(|criterion| criterion.rank);

            let mut seen_ranks = HashMap::new();
            for criterion in criteria.iter().filter(|criterion| criterion.active) {
                if let Some(other) = seen_ranks.insert(criterion.rank, criterion.id) {
                    return Err(ConfigError::Validation(format!(
                        "feedback {} assigns rank {} to both {} and {}",
                        feedback.id, criterion.rank, other, criterion.id
                    )));
                }

                match &criterion.model {
                    Some(model) if !models.contains_key(model) => {
                        return Err(ConfigError::UnknownModel {
                            criterion: criterion.id,
                            model: model.clone(),
                        });
                    }
                    None if default_model.is_none() => {
                        return Err(ConfigError::NoDefaultModel {
                            criterion: criterion.id,
                        });
                    }
                    _ => {}
                }
            }

            let plan = FeedbackPlan {
                id: feedback.id,
                task: TaskContext {
                    title: feedback.task_title.clone(),
                    description: feedback.task_description.clone(),
                    context: feedback.task_context.clone(),
                },
                course: CourseContext {
                    name: feedback.course_name.clone(),
                    context: feedback.course_context.clone(),
                },
                criteria,
            };

            if feedbacks.insert(plan.id, Arc::new(plan)).is_some() {
                return Err(ConfigError::Validation(format!(
                    "duplicate feedback id {}",
                    feedback.id
                )));
            }
        }

        Ok(Self {
            providers,
            models,
            default_model,
            feedbacks,
        })
    }

    pub fn provider(&self, id: &str) -> Option<Arc<ProviderSettings>> {
        self.providers.get(id).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<ProviderSettings>> {
        self.providers.values()
    }

    pub fn model(&self, id: &str) -> Option<Arc<ModelSettings>> {
        self.models.get(id).cloned()
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSettings>> {
        self.models.values()
    }

    pub fn default_model(&self) -> Option<Arc<ModelSettings>> {
        self.default_model
            .as_ref()
            .and_then(|id| self.models.get(id).cloned())
    }

    pub fn feedback(&self, id: Uuid) -> Option<Arc<FeedbackPlan>> {
        self.feedbacks.get(&id).cloned()
    }

    pub fn feedbacks(&self) -> impl Iterator<Item = &Arc<FeedbackPlan>> {
        self.feedbacks.values()
    }

    /// Effective model for a criterion: its assigned model, else the process
    /// default.
    pub fn resolve_criterion_model(
        &self,
        criterion: &CriterionSpec,
    ) -> Result<(Arc<ModelSettings>, Arc<ProviderSettings>), ConfigError> {
        let model = match &criterion.model {
            Some(id) => self
                .models
                .get(id)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownModel {
                    criterion: criterion.id,
                    model: id.clone(),
                })?,
            None => self
                .default_model()
                .ok_or(ConfigError::NoDefaultModel {
                    criterion: criterion.id,
                })?,
        };

        let provider =
            self.providers
                .get(&model.provider)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownProvider {
                    model: model.id.clone(),
                    provider: model.provider.clone(),
                })?;

        Ok((model, provider))
    }
}

// ── Live holder ───────────────────────────────────────────────────

/// Holds the current snapshot; `install`/`reload_from` swap it atomically
/// without disturbing in-flight runs.
pub struct Catalog {
    inner: ArcSwap<CatalogSnapshot>,
}

impl Catalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            inner: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.inner.load_full()
    }

    pub fn install(&self, snapshot: CatalogSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }

    pub fn reload_from(&self, path: &Path) -> Result<(), ConfigError> {
        let config = Config::load(path)?;
        let snapshot = CatalogSnapshot::from_config(&config)?;
        self.install(snapshot);
        tracing::info!(path = %path.display(), "Catalog reloaded");
        Ok(())
    }
}
