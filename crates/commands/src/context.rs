//! Execution context and the explicit capability descriptor.
//!
//! Handlers declare which contextual values they need through
//! [`CommandNeeds`]; the executor verifies availability before invoking a
//! handler, so a handler can unwrap its declared dependencies through the
//! `require_*` accessors without defensive checks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openbrowser_perception::PageAnalyzer;
use openbrowser_viewport::Browser;
use serde_json::Value;

use crate::errors::CommandError;

/// Narrow extraction capability handed to `extract` /
/// `extract_structured`. Implemented by the agent layer over its
/// LanguageModel.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Distill `page_text` according to `goal`; `schema`, when present,
    /// constrains the output shape.
    async fn extract(
        &self,
        goal: &str,
        page_text: &str,
        schema: Option<&Value>,
    ) -> Result<Value, CommandError>;
}

/// Which contextual values a catalog entry consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandNeeds {
    pub browser: bool,
    pub analyzer: bool,
    pub extraction_model: bool,
    pub sandbox: bool,
    pub masked_values: bool,
}

impl CommandNeeds {
    pub fn browser() -> Self {
        Self {
            browser: true,
            ..Default::default()
        }
    }

    pub fn analyzer() -> Self {
        Self {
            browser: true,
            analyzer: true,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_extraction(mut self) -> Self {
        self.extraction_model = true;
        self
    }

    pub fn with_sandbox(mut self) -> Self {
        self.sandbox = true;
        self
    }
}

/// Contextual values injected into handlers.
#[derive(Clone)]
pub struct ExecutionContext {
    pub browser: Option<Arc<dyn Browser>>,
    pub analyzer: Option<Arc<PageAnalyzer>>,
    pub extraction_model: Option<Arc<dyn ExtractionModel>>,
    /// Directory uploads and captures are confined to.
    pub sandbox_dir: Option<PathBuf>,
    /// key -> secret; occurrences of secrets in text parameters are
    /// replaced by `<key>` markers before validation.
    pub masked_values: HashMap<String, String>,
    pub navigation_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            browser: None,
            analyzer: None,
            extraction_model: None,
            sandbox_dir: None,
            masked_values: HashMap::new(),
            navigation_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutionContext {
    pub fn new(browser: Arc<dyn Browser>, analyzer: Arc<PageAnalyzer>) -> Self {
        Self {
            browser: Some(browser),
            analyzer: Some(analyzer),
            ..Default::default()
        }
    }

    pub fn with_extraction_model(mut self, model: Arc<dyn ExtractionModel>) -> Self {
        self.extraction_model = Some(model);
        self
    }

    pub fn with_sandbox(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sandbox_dir = Some(dir.into());
        self
    }

    pub fn with_masked_values(mut self, masked: HashMap<String, String>) -> Self {
        self.masked_values = masked;
        self
    }

    /// Verify the declared needs are satisfiable; the executor calls this
    /// before dispatch.
    pub fn satisfies(&self, name: &str, needs: &CommandNeeds) -> Result<(), CommandError> {
        let missing: Option<&'static str> = if needs.browser && self.browser.is_none() {
            Some("browser")
        } else if needs.analyzer && self.analyzer.is_none() {
            Some("analyzer")
        } else if needs.extraction_model && self.extraction_model.is_none() {
            Some("extraction_model")
        } else if needs.sandbox && self.sandbox_dir.is_none() {
            Some("sandbox")
        } else {
            None
        };
        match missing {
            Some(capability) => Err(CommandError::MissingCapability {
                name: name.to_string(),
                capability,
            }),
            None => Ok(()),
        }
    }

    pub fn require_browser(&self) -> Result<&Arc<dyn Browser>, CommandError> {
        self.browser
            .as_ref()
            .ok_or(CommandError::MissingCapability {
                name: String::new(),
                capability: "browser",
            })
    }

    pub fn require_analyzer(&self) -> Result<&Arc<PageAnalyzer>, CommandError> {
        self.analyzer
            .as_ref()
            .ok_or(CommandError::MissingCapability {
                name: String::new(),
                capability: "analyzer",
            })
    }

    pub fn require_extraction_model(&self) -> Result<&Arc<dyn ExtractionModel>, CommandError> {
        self.extraction_model
            .as_ref()
            .ok_or(CommandError::MissingCapability {
                name: String::new(),
                capability: "extraction_model",
            })
    }

    pub fn require_sandbox(&self) -> Result<&PathBuf, CommandError> {
        self.sandbox_dir
            .as_ref()
            .ok_or(CommandError::MissingCapability {
                name: String::new(),
                capability: "sandbox",
            })
    }
}
