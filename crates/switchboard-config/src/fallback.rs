use indexmap::IndexMap;
use serde::Deserialize;

/// Fallback routing between providers
///
/// Logical model ids are either `provider/model` or an alias listed here.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackConfig {
    /// Allow routing past the requested provider
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Short names mapped to `provider/model`
    #[serde(default)]
    pub aliases: IndexMap<String, String>,
    /// Ordered alternatives per logical model
    #[serde(default)]
    pub chains: IndexMap<String, Vec<String>>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            aliases: IndexMap::new(),
            chains: IndexMap::new(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}
