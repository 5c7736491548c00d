use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::registry::{self, LanguageProfile};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One execution request as submitted by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub language: String,
    #[serde(default)]
    pub image: Option<String>,
    pub script_content: String,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

/// A request after defaulting, with its language profile resolved.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub language: String,
    pub image: String,
    pub script_content: String,
    pub timeout: Duration,
    pub profile: &'static LanguageProfile,
}

impl JobConfig {
    pub fn new(language: impl Into<String>, script_content: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            script_content: script_content.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate the language and fill in the image and timeout defaults.
    ///
    /// Touches nothing outside this value, so it is safe to call before any
    /// engine interaction.
    pub fn normalize(self) -> Result<ResolvedJob, ExecError> {
        let profile =
            registry::lookup(&self.language).ok_or_else(|| ExecError::UnsupportedLanguage {
                language: self.language.clone(),
            })?;

        let image = match self.image {
            Some(image) if !image.trim().is_empty() => image.trim().to_string(),
            _ => profile.default_image.to_string(),
        };

        let timeout = match self.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_TIMEOUT,
        };

        Ok(ResolvedJob {
            language: self.language,
            image,
            script_content: self.script_content,
            timeout,
            profile,
        })
    }
}
