//! Vision Switch Manager (spec §4.H): detect image content in a request
//! and, if the resolved model can't see, swap to one that can.
//!
//! The content-part shape is the same tagged union the teacher uses for
//! `OpenAiContent`/`AnthropicContent` (`moltis-agents::multimodal`), kept
//! here at the abstract layer rather than duplicated per-provider.

use std::{collections::VecDeque, sync::LazyLock};

use helix_common::{Error, Result};
use regex::Regex;
use tokio::sync::RwLock;

use crate::types::{ContentPart, LlmRequest, ModelDescriptor};

static DATA_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"data:image/(png|jpe?g|gif|webp|bmp);base64,").expect("static pattern is valid"));

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const GIF_MAGIC: [u8; 4] = [0x47, 0x49, 0x46, 0x38];
const BMP_MAGIC: [u8; 2] = [0x42, 0x4D];

/// How long a switch's effect lasts (spec §4.H's mode table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    /// Override the model for this request only; does not append to
    /// history (resolved Open Question, recorded in the grounding ledger).
    Once,
    /// Set the current model for the live session; recorded in history.
    Session,
    /// As `Session`, and also persists as the new default.
    Persist,
}

impl SwitchMode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "once" => Ok(Self::Once),
            "session" => Ok(Self::Session),
            "persist" => Ok(Self::Persist),
            other => Err(Error::InvalidArgument(format!("mode: unknown switch mode {other:?}"))),
        }
    }
}

/// One detection method contributing evidence of image content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    MimeOrExtension,
    DataUri,
    ImageUrl,
    MagicBytes,
}

impl DetectionMethod {
    /// Parse the config-file spelling (`"attachment"`, `"data_uri"`,
    /// `"url"`, `"magic_bytes"`) used by a `VisionConfig::detection_methods` entry.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "attachment" => Ok(Self::MimeOrExtension),
            "data_uri" => Ok(Self::DataUri),
            "url" => Ok(Self::ImageUrl),
            "magic_bytes" => Ok(Self::MagicBytes),
            other => Err(Error::InvalidArgument(format!("detection_methods: unknown method {other:?}"))),
        }
    }
}

/// Manager configuration, validated on construction (spec §4.H: "reject an
/// empty detection-method list, an unknown mode, and a missing
/// fallback/preferred model").
pub struct VisionSwitchConfig {
    pub detection_methods: Vec<DetectionMethod>,
    pub mode: SwitchMode,
    pub preferred_models: Vec<String>,
    pub fallback_model: String,
    pub history_capacity: usize,
}

impl VisionSwitchConfig {
    pub fn validate(mode: &str, preferred_models: &[String], fallback_model: &str, detection_methods: Vec<DetectionMethod>) -> Result<Self> {
        if detection_methods.is_empty() {
            return Err(Error::InvalidArgument("detection_methods: must not be empty".into()));
        }
        if fallback_model.trim().is_empty() && preferred_models.is_empty() {
            return Err(Error::InvalidArgument("fallback_model: missing fallback/preferred model".into()));
        }
        Ok(Self {
            detection_methods,
            mode: SwitchMode::parse(mode)?,
            preferred_models: preferred_models.to_vec(),
            fallback_model: fallback_model.to_string(),
            history_capacity: 100,
        })
    }
}

/// A recorded switch event.
#[derive(Debug, Clone)]
pub struct SwitchEvent {
    pub id: u64,
    pub from_model: String,
    pub to_model: String,
    pub mode: SwitchMode,
}

/// Outcome of [`VisionSwitchManager::process_input`].
#[derive(Debug, Clone)]
pub struct SwitchResult {
    pub switch_performed: bool,
    pub to_model: Option<String>,
    pub event_id: Option<u64>,
}

struct Inner {
    current_model: Option<String>,
    history: VecDeque<SwitchEvent>,
    next_event_id: u64,
    /// The model a `persist`-mode switch designated as the new default.
    /// Unlike `current_model`, this is never cleared by `revert` — it's
    /// the caller's cue to write a new default back to config.
    persisted_model: Option<String>,
}

/// Detects image content and swaps the active model when the resolved one
/// can't see.
pub struct VisionSwitchManager {
    config: VisionSwitchConfig,
    inner: RwLock<Inner>,
}

impl VisionSwitchManager {
    #[must_use]
    pub fn new(config: VisionSwitchConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                current_model: None,
                history: VecDeque::new(),
                next_event_id: 1,
                persisted_model: None,
            }),
        }
    }

    /// Aggregate evidence of image content per the configured detection
    /// methods (spec §4.H detector sources a/b/c plus optional magic-byte
    /// sniffing).
    #[must_use]
    pub fn has_images(&self, request: &LlmRequest) -> bool {
        for message in &request.messages {
            for part in &message.content {
                match part {
                    ContentPart::Image { image } => {
                        if self.config.detection_methods.contains(&DetectionMethod::MimeOrExtension) && is_image_mime_or_ext(&image.media_type, image.url.as_deref()) {
                            return true;
                        }
                        if self.config.detection_methods.contains(&DetectionMethod::MagicBytes) {
                            if let Some(bytes) = image.data_base64.as_ref().and_then(|b| base64_decode_prefix(b)) {
                                if sniff_magic_bytes(&bytes) {
                                    return true;
                                }
                            }
                        }
                        return true;
                    },
                    ContentPart::Text { text } => {
                        if self.config.detection_methods.contains(&DetectionMethod::DataUri) && DATA_URI_RE.is_match(text) {
                            return true;
                        }
                        if self.config.detection_methods.contains(&DetectionMethod::ImageUrl) && looks_like_image_url(text) {
                            return true;
                        }
                    },
                }
            }
        }
        false
    }

    fn select_vision_model(&self, available: &[ModelDescriptor]) -> Option<ModelDescriptor> {
        for preferred in &self.config.preferred_models {
            if let Some(model) = available.iter().find(|m| &m.name == preferred && m.supports_vision()) {
                return Some(model.clone());
            }
        }
        available.iter().find(|m| m.supports_vision()).cloned().or_else(|| available.iter().find(|m| m.name == self.config.fallback_model).cloned())
    }

    /// Apply the configured mode if `request` needs a vision switch.
    /// `current` is the model the router resolved before this check.
    pub async fn process_input(&self, request: &LlmRequest, current: &ModelDescriptor, available: &[ModelDescriptor]) -> SwitchResult {
        if current.supports_vision() || !self.has_images(request) {
            return SwitchResult {
                switch_performed: false,
                to_model: None,
                event_id: None,
            };
        }

        let Some(target) = self.select_vision_model(available) else {
            return SwitchResult {
                switch_performed: false,
                to_model: None,
                event_id: None,
            };
        };

        let mut inner = self.inner.write().await;
        match self.config.mode {
            SwitchMode::Once => SwitchResult {
                switch_performed: true,
                to_model: Some(target.name),
                event_id: None,
            },
            SwitchMode::Session | SwitchMode::Persist => {
                let id = inner.next_event_id;
                inner.next_event_id += 1;
                let event = SwitchEvent {
                    id,
                    from_model: current.name.clone(),
                    to_model: target.name.clone(),
                    mode: self.config.mode,
                };
                if inner.history.len() >= self.config.history_capacity {
                    inner.history.pop_front();
                }
                inner.history.push_back(event);
                inner.current_model = Some(target.name.clone());
                if self.config.mode == SwitchMode::Persist {
                    inner.persisted_model = Some(target.name.clone());
                }
                SwitchResult {
                    switch_performed: true,
                    to_model: Some(target.name),
                    event_id: Some(id),
                }
            },
        }
    }

    #[must_use]
    pub async fn is_switch_active(&self) -> bool {
        self.inner.read().await.current_model.is_some()
    }

    /// The model a `persist`-mode switch most recently designated as the
    /// new default, if any. Callers that own a persistence layer (e.g. the
    /// CLI's config writer) poll this after `process_input` to carry the
    /// switch beyond this manager's lifetime; `once`/`session` switches
    /// never populate it.
    #[must_use]
    pub async fn persisted_default_model(&self) -> Option<String> {
        self.inner.read().await.persisted_model.clone()
    }

    /// Restore the prior model if `event_id` is still the active switch.
    pub async fn revert(&self, event_id: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(event) = inner.history.iter().rev().find(|e| e.id == event_id).cloned() else {
            return Err(Error::NotFound(format!("switch event {event_id}")));
        };
        let is_active = inner.current_model.as_deref() == Some(event.to_model.as_str());
        if is_active {
            inner.current_model = Some(event.from_model);
        }
        Ok(())
    }
}

fn is_image_mime_or_ext(media_type: &str, url: Option<&str>) -> bool {
    if media_type.starts_with("image/") {
        return true;
    }
    url.is_some_and(|u| IMAGE_EXTENSIONS.iter().any(|ext| u.to_lowercase().ends_with(&format!(".{ext}"))))
}

fn looks_like_image_url(text: &str) -> bool {
    text.split_whitespace()
        .any(|token| (token.starts_with("http://") || token.starts_with("https://")) && IMAGE_EXTENSIONS.iter().any(|ext| token.to_lowercase().ends_with(&format!(".{ext}"))))
}

fn base64_decode_prefix(data: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data.get(..data.len().min(32))?).ok()
}

fn sniff_magic_bytes(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_MAGIC) || bytes.starts_with(&JPEG_MAGIC) || bytes.starts_with(&GIF_MAGIC) || bytes.starts_with(&BMP_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capabilities, ImageRef, Message, Role};

    fn config() -> VisionSwitchConfig {
        VisionSwitchConfig::validate(
            "session",
            &["vision-pro".to_string()],
            "vision-fallback",
            vec![DetectionMethod::MimeOrExtension, DetectionMethod::DataUri, DetectionMethod::ImageUrl],
        )
        .expect("test")
    }

    fn model(name: &str, vision: bool) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            provider: "p".to_string(),
            context_size: 100_000,
            max_output_tokens: 4096,
            capabilities: Capabilities {
                vision,
                text: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn validate_rejects_empty_detection_methods() {
        let err = VisionSwitchConfig::validate("session", &[], "fallback", vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn validate_rejects_unknown_mode() {
        let err = VisionSwitchConfig::validate("sometimes", &[], "fallback", vec![DetectionMethod::DataUri]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn detects_image_content_part() {
        let manager = VisionSwitchManager::new(config());
        let request = LlmRequest::new(
            "text-model",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );
        assert!(manager.has_images(&request));
    }

    #[test]
    fn detects_data_uri_in_text() {
        let manager = VisionSwitchManager::new(config());
        let request = LlmRequest::new("text-model", vec![Message::text(Role::User, "see data:image/png;base64,iVBORw0KGgo=")]);
        assert!(manager.has_images(&request));
    }

    #[tokio::test]
    async fn once_mode_does_not_append_to_history() {
        let config = VisionSwitchConfig::validate("once", &["vision-pro".into()], "vision-fallback", vec![DetectionMethod::MimeOrExtension]).expect("test");
        let manager = VisionSwitchManager::new(config);
        let request = LlmRequest::new(
            "text-model",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );

        let result = manager.process_input(&request, &model("text-model", false), &[model("vision-pro", true)]).await;
        assert!(result.switch_performed);
        assert_eq!(result.to_model.as_deref(), Some("vision-pro"));
        assert!(result.event_id.is_none());
        assert!(!manager.is_switch_active().await);
    }

    #[tokio::test]
    async fn session_mode_records_event_and_stays_active() {
        let manager = VisionSwitchManager::new(config());
        let request = LlmRequest::new(
            "text-model",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );

        let result = manager.process_input(&request, &model("text-model", false), &[model("vision-pro", true)]).await;
        assert!(result.switch_performed);
        assert!(manager.is_switch_active().await);
        assert!(result.event_id.is_some());
    }

    #[tokio::test]
    async fn revert_restores_prior_model_when_still_active() {
        let manager = VisionSwitchManager::new(config());
        let request = LlmRequest::new(
            "text-model",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );
        let result = manager.process_input(&request, &model("text-model", false), &[model("vision-pro", true)]).await;
        let event_id = result.event_id.expect("test");

        manager.revert(event_id).await.expect("test");
        assert!(!manager.is_switch_active().await);
    }

    #[tokio::test]
    async fn session_mode_does_not_set_persisted_default() {
        let manager = VisionSwitchManager::new(config());
        let request = LlmRequest::new(
            "text-model",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );

        let result = manager.process_input(&request, &model("text-model", false), &[model("vision-pro", true)]).await;
        assert!(result.switch_performed);
        assert!(manager.persisted_default_model().await.is_none());
    }

    #[tokio::test]
    async fn persist_mode_sets_persisted_default_and_stays_active() {
        let config = VisionSwitchConfig::validate("persist", &["vision-pro".into()], "vision-fallback", vec![DetectionMethod::MimeOrExtension]).expect("test");
        let manager = VisionSwitchManager::new(config);
        let request = LlmRequest::new(
            "text-model",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );

        let result = manager.process_input(&request, &model("text-model", false), &[model("vision-pro", true)]).await;
        assert!(result.switch_performed);
        assert!(manager.is_switch_active().await);
        assert_eq!(manager.persisted_default_model().await.as_deref(), Some("vision-pro"));
    }

    #[tokio::test]
    async fn no_switch_when_current_model_already_supports_vision() {
        let manager = VisionSwitchManager::new(config());
        let request = LlmRequest::new(
            "vision-pro",
            vec![Message {
                role: Role::User,
                content: vec![ContentPart::Image {
                    image: ImageRef {
                        media_type: "image/png".into(),
                        data_base64: None,
                        url: None,
                    },
                }],
                cache_control: false,
            }],
        );
        let result = manager.process_input(&request, &model("vision-pro", true), &[]).await;
        assert!(!result.switch_performed);
    }
}
