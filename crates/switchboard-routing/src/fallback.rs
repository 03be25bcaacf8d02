//! Provider ordering for a logical model

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use switchboard_config::FallbackConfig;

use crate::{RoutingError, health::ProviderHealthTracker};

/// A concrete `(provider, model)` pair to try
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Candidate {
    pub provider: String,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Split `provider/model` on the first slash
    pub fn parse(id: &str) -> Option<Self> {
        let (provider, model) = id.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }

    /// Qualified `provider/model` id
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Orders candidates for a logical model, skipping providers that are down
#[derive(Debug)]
pub struct FallbackRouter {
    enabled: bool,
    aliases: HashMap<String, Candidate>,
    chains: HashMap<String, Vec<Candidate>>,
    /// Providers that can serve a call; `None` accepts any
    registered: Option<HashSet<String>>,
    health: Arc<ProviderHealthTracker>,
}

impl FallbackRouter {
    pub fn new(config: &FallbackConfig, health: Arc<ProviderHealthTracker>) -> Result<Self, RoutingError> {
        let aliases = config
            .aliases
            .iter()
            .map(|(alias, target)| parse_qualified(target).map(|candidate| (alias.clone(), candidate)))
            .collect::<Result<HashMap<_, _>, _>>()?;

        let chains = config
            .chains
            .iter()
            .map(|(model, chain)| {
                chain
                    .iter()
                    .map(|id| parse_qualified(id))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|candidates| (model.clone(), candidates))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(Self {
            enabled: config.enabled,
            aliases,
            chains,
            registered: None,
            health,
        })
    }

    /// Drop fallback candidates whose provider is not in `providers`
    #[must_use]
    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registered = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    fn is_registered(&self, provider: &str) -> bool {
        self.registered.as_ref().is_none_or(|ids| ids.contains(provider))
    }

    /// Resolve a logical id to its primary candidate
    pub fn resolve(&self, logical_model: &str) -> Result<Candidate, RoutingError> {
        if let Some(candidate) = self.aliases.get(logical_model) {
            return Ok(candidate.clone());
        }
        Candidate::parse(logical_model).ok_or_else(|| RoutingError::UnknownModel {
            model: logical_model.to_owned(),
        })
    }

    /// Candidates to try, in order
    ///
    /// The requested provider comes first, then the configured chain. Chain
    /// entries naming an unregistered provider are dropped. Down providers
    /// are skipped; when every candidate is down, the one that went down
    /// earliest is returned alone.
    pub fn route(&self, logical_model: &str, allow_fallback: bool) -> Result<Vec<Candidate>, RoutingError> {
        let primary = self.resolve(logical_model)?;
        let mut ordered = vec![primary.clone()];

        if allow_fallback && self.enabled {
            let chain = self
                .chains
                .get(logical_model)
                .or_else(|| self.chains.get(&primary.id()))
                .into_iter()
                .flatten();
            for candidate in chain {
                if !ordered.contains(candidate) && self.is_registered(&candidate.provider) {
                    ordered.push(candidate.clone());
                }
            }
        }

        let live: Vec<_> = ordered
            .iter()
            .filter(|candidate| !self.health.is_down(&candidate.provider))
            .cloned()
            .collect();

        if let Some(first) = live.first() {
            if *first != primary {
                tracing::info!(
                    model = logical_model,
                    requested = %primary,
                    selected = %first,
                    "requested provider is down, routing to fallback"
                );
            }
            return Ok(live);
        }

        let last_resort = ordered
            .into_iter()
            .min_by_key(|candidate| self.health.down_since(&candidate.provider))
            .unwrap_or(primary);
        tracing::warn!(
            model = logical_model,
            selected = %last_resort,
            "every candidate is down, trying the earliest to fail"
        );
        Ok(vec![last_resort])
    }

    pub const fn health(&self) -> &Arc<ProviderHealthTracker> {
        &self.health
    }
}

fn parse_qualified(id: &str) -> Result<Candidate, RoutingError> {
    Candidate::parse(id).ok_or_else(|| RoutingError::Config(format!("'{id}' is not a provider/model id")))
}
