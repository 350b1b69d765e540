//! Model-name resolution
//!
//! Maps the model string a client asks for onto a provider, its wire family,
//! the name the upstream expects and the features that combination supports.
//! Resolution happens once per request, before any upstream call.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GatewayError;
use crate::config::{ModelEntry, ModelsConfig, ProvidersConfig};

/// Upstream chat providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
        }
    }

    pub fn family(&self) -> ProviderFamily {
        match self {
            Provider::Gemini => ProviderFamily::NativeMultimodal,
            Provider::OpenAi | Provider::DeepSeek => ProviderFamily::OpenAiCompatible,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire protocol shared by a group of providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    NativeMultimodal,
    OpenAiCompatible,
}

/// Optional request features an adapter may or may not honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    WebSearch,
    SystemInstruction,
    AttachmentReplay,
    ImageInput,
}

impl Feature {
    pub fn describe(&self) -> &'static str {
        match self {
            Feature::WebSearch => "web search",
            Feature::SystemInstruction => "system instructions",
            Feature::AttachmentReplay => "attachment replay",
            Feature::ImageInput => "image input",
        }
    }
}

/// A fully resolved chat target.
#[derive(Clone, PartialEq)]
pub struct ProviderModel {
    pub provider: Provider,
    pub family: ProviderFamily,
    pub base_url: String,
    pub api_key: String,
    /// Name the client asked for.
    pub requested_name: String,
    /// Name sent upstream.
    pub wire_model_name: String,
    pub supports_web_search: bool,
    pub supports_system_instruction: bool,
    pub supports_attachment_replay: bool,
    pub supports_thinking: bool,
    pub supports_image_input: bool,
}

impl ProviderModel {
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::WebSearch => self.supports_web_search,
            Feature::SystemInstruction => self.supports_system_instruction,
            Feature::AttachmentReplay => self.supports_attachment_replay,
            Feature::ImageInput => self.supports_image_input,
        }
    }
}

impl fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderModel")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("requested_name", &self.requested_name)
            .field("wire_model_name", &self.wire_model_name)
            .field("supports_web_search", &self.supports_web_search)
            .field("supports_system_instruction", &self.supports_system_instruction)
            .field("supports_attachment_replay", &self.supports_attachment_replay)
            .field("supports_thinking", &self.supports_thinking)
            .finish_non_exhaustive()
    }
}

const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "o3-mini",
    "o4-mini",
];

const DEEPSEEK_ALIASES: &[(&str, &str)] = &[
    ("deepseek-v3", "deepseek-chat"),
    ("deepseek-r1", "deepseek-reasoner"),
];

/// Static model table plus any overrides from the config file.
#[derive(Debug, Clone)]
pub struct ModelTable {
    providers: ProvidersConfig,
    overrides: Vec<ModelEntry>,
    native_attachment_replay: bool,
}

/// Capabilities before credentials are attached.
struct Traits {
    provider: Provider,
    wire_name: String,
    web_search: bool,
    system_instruction: bool,
    attachment_replay: bool,
    thinking: bool,
}

impl ModelTable {
    pub fn new(providers: ProvidersConfig, models: &ModelsConfig) -> Self {
        Self {
            providers,
            overrides: models.overrides.clone(),
            native_attachment_replay: models.native_attachment_replay,
        }
    }

    /// Resolve a requested model. Unknown names fail with `ValidationError`;
    /// a known provider without credentials fails with `ConfigurationError`.
    pub fn resolve(&self, requested: &str) -> Result<ProviderModel, GatewayError> {
        let name = requested.trim();
        let traits = self
            .lookup_override(name)
            .or_else(|| self.lookup_builtin(name))
            .ok_or_else(|| GatewayError::validation(format!("Unsupported model: {name}")))?;

        let endpoint = self.providers.endpoint(traits.provider);
        let api_key = endpoint.api_key.clone().ok_or_else(|| {
            GatewayError::configuration(format!(
                "{} API key is not configured",
                traits.provider
            ))
        })?;

        Ok(ProviderModel {
            provider: traits.provider,
            family: traits.provider.family(),
            base_url: endpoint.base_url.clone(),
            api_key,
            requested_name: name.to_string(),
            wire_model_name: traits.wire_name,
            supports_web_search: traits.web_search,
            supports_system_instruction: traits.system_instruction,
            supports_attachment_replay: traits.attachment_replay,
            supports_thinking: traits.thinking,
            supports_image_input: traits.provider != Provider::DeepSeek,
        })
    }

    fn lookup_override(&self, name: &str) -> Option<Traits> {
        let entry = self.overrides.iter().find(|e| e.name == name)?;
        let defaults = self.defaults_for(entry.provider, name);
        Some(Traits {
            provider: entry.provider,
            wire_name: entry.wire_name.clone().unwrap_or_else(|| name.to_string()),
            web_search: entry.supports_web_search.unwrap_or(defaults.web_search),
            system_instruction: entry
                .supports_system_instruction
                .unwrap_or(defaults.system_instruction),
            attachment_replay: entry
                .supports_attachment_replay
                .unwrap_or(defaults.attachment_replay),
            thinking: entry.supports_thinking.unwrap_or(defaults.thinking),
        })
    }

    fn lookup_builtin(&self, name: &str) -> Option<Traits> {
        if name.starts_with("gemini-") {
            return Some(self.defaults_for(Provider::Gemini, name));
        }
        if OPENAI_MODELS.contains(&name) {
            return Some(self.defaults_for(Provider::OpenAi, name));
        }
        if name.starts_with("deepseek-") {
            let mut traits = self.defaults_for(Provider::DeepSeek, name);
            if let Some((_, wire)) = DEEPSEEK_ALIASES.iter().find(|(alias, _)| *alias == name) {
                traits.wire_name = (*wire).to_string();
            }
            return Some(traits);
        }
        None
    }

    fn defaults_for(&self, provider: Provider, name: &str) -> Traits {
        match provider {
            Provider::Gemini => Traits {
                provider,
                wire_name: name.to_string(),
                web_search: true,
                system_instruction: true,
                attachment_replay: self.native_attachment_replay,
                thinking: name.starts_with("gemini-2.5") || name.contains("thinking"),
            },
            Provider::OpenAi => Traits {
                provider,
                wire_name: name.to_string(),
                web_search: false,
                // o-series reasoning models reject the system role.
                system_instruction: !name.starts_with('o'),
                attachment_replay: true,
                thinking: false,
            },
            Provider::DeepSeek => Traits {
                provider,
                wire_name: name.to_string(),
                web_search: false,
                system_instruction: true,
                attachment_replay: false,
                thinking: name.contains("reasoner") || name.ends_with("-r1"),
            },
        }
    }
}
