//! The command catalog: a registry of entries with schemas, capability
//! descriptors and domain filters. Built once, immutable afterwards.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::schema::RootSchema;
use schemars::schema_for;
use tracing::debug;
use url::Url;

use openbrowser_viewport::guards::domain_matches;

use crate::context::{CommandNeeds, ExecutionContext};
use crate::errors::CommandError;
use crate::handlers::BuiltinHandler;
use crate::model::{Command, CommandResult};

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
    ) -> Result<CommandResult, CommandError>;
}

pub struct CatalogEntry {
    pub name: &'static str,
    pub description: String,
    pub schema: RootSchema,
    pub needs: CommandNeeds,
    pub terminates_sequence: bool,
    pub page_changing: bool,
    /// Base domains this entry is exposed for; `None` lists it everywhere.
    pub domain_filter: Option<Vec<String>>,
    pub handler: Arc<dyn CommandHandler>,
}

/// Additive registration with include/exclude sets; `build` freezes the
/// catalog.
pub struct CatalogBuilder {
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
    entries: BTreeMap<&'static str, CatalogEntry>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            include: None,
            exclude: HashSet::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Restrict registration to the given names.
    pub fn include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn register(mut self, entry: CatalogEntry) -> Self {
        if self.exclude.contains(entry.name) {
            debug!(target: "command-catalog", name = entry.name, "entry excluded");
            return self;
        }
        if let Some(include) = &self.include {
            if !include.contains(entry.name) {
                debug!(target: "command-catalog", name = entry.name, "entry not included");
                return self;
            }
        }
        self.entries.insert(entry.name, entry);
        self
    }

    pub fn build(self) -> CommandCatalog {
        CommandCatalog {
            entries: self.entries,
        }
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CommandCatalog {
    entries: BTreeMap<&'static str, CatalogEntry>,
}

impl CommandCatalog {
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Entries applicable on `origin` (a URL); universal entries always
    /// qualify, filtered entries need a base-domain match.
    pub fn entries_for(&self, origin: Option<&str>) -> Vec<&CatalogEntry> {
        let host = origin
            .and_then(|o| Url::parse(o).ok())
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .map(|h| h.trim_start_matches("www.").to_string());

        self.entries
            .values()
            .filter(|entry| match (&entry.domain_filter, &host) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(domains), Some(host)) => {
                    domains.iter().any(|domain| domain_matches(domain, host))
                }
            })
            .collect()
    }

    /// Prompt-facing listing of applicable entries.
    pub fn describe_for(&self, origin: Option<&str>) -> String {
        self.entries_for(origin)
            .iter()
            .map(|entry| format!("- {}: {}", entry.name, entry.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Name, description and JSON Schema triples, for external tool
    /// surfaces.
    pub fn schemas(&self) -> Vec<(&'static str, &str, &RootSchema)> {
        self.entries
            .values()
            .map(|e| (e.name, e.description.as_str(), &e.schema))
            .collect()
    }
}

fn entry(
    name: &'static str,
    description: &str,
    schema: RootSchema,
    needs: CommandNeeds,
    page_changing: bool,
) -> CatalogEntry {
    CatalogEntry {
        name,
        description: description.to_string(),
        schema,
        needs,
        terminates_sequence: false,
        page_changing,
        domain_filter: None,
        handler: Arc::new(BuiltinHandler),
    }
}

/// The full built-in command set.
pub fn default_catalog() -> CommandCatalog {
    default_catalog_with(CatalogBuilder::new())
}

/// Register the built-in set on a caller-configured builder (include and
/// exclude sets applied during registration).
pub fn default_catalog_with(builder: CatalogBuilder) -> CommandCatalog {
    use crate::model::*;

    let mut finish = entry(
        "finish",
        "Report the task as finished with a final answer; success=false when the task is impossible. Always the last action.",
        schema_for!(FinishParams),
        CommandNeeds::none(),
        false,
    );
    finish.terminates_sequence = true;

    builder
        .register(entry(
            "navigate",
            "Open an absolute URL in the current tab.",
            schema_for!(NavigateParams),
            CommandNeeds::browser(),
            true,
        ))
        .register(entry(
            "tap",
            "Click the interactive element with the given index.",
            schema_for!(TapParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .register(entry(
            "type_text",
            "Type into the element with the given index; clears the existing value unless clear_first=false.",
            schema_for!(TypeTextParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .register(entry(
            "scroll",
            "Scroll the page up/down/left/right by an optional pixel amount (default: one viewport).",
            schema_for!(ScrollParams),
            CommandNeeds::browser(),
            false,
        ))
        .register(entry(
            "scroll_to",
            "Scroll the element with the given index into view.",
            schema_for!(ScrollToParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .register(entry(
            "press_keys",
            "Press keyboard chords, e.g. 'Enter' or 'Control+a Delete'.",
            schema_for!(PressKeysParams),
            CommandNeeds::browser(),
            false,
        ))
        .register(entry(
            "focus_tab",
            "Switch to another tab by its id.",
            schema_for!(FocusTabParams),
            CommandNeeds::browser(),
            true,
        ))
        .register(entry(
            "new_tab",
            "Open a new tab, optionally at a URL, and switch to it.",
            schema_for!(NewTabParams),
            CommandNeeds::browser(),
            true,
        ))
        .register(entry(
            "close_tab",
            "Close a tab by id (the current tab when omitted).",
            schema_for!(CloseTabParams),
            CommandNeeds::browser(),
            true,
        ))
        .register(entry(
            "extract",
            "Extract information matching a natural-language goal from the visible page.",
            schema_for!(ExtractParams),
            CommandNeeds::browser(),
            false,
        ))
        .register(entry(
            "extract_structured",
            "Extract JSON conforming to the provided schema from the visible page.",
            schema_for!(ExtractStructuredParams),
            CommandNeeds::browser().with_extraction(),
            false,
        ))
        .register(finish)
        .register(entry(
            "web_search",
            "Run a web search and land on the results page.",
            schema_for!(WebSearchParams),
            CommandNeeds::browser(),
            true,
        ))
        .register(entry(
            "upload",
            "Attach a file from the sandbox to the file input with the given index.",
            schema_for!(UploadParams),
            CommandNeeds::analyzer().with_sandbox(),
            false,
        ))
        .register(entry(
            "select",
            "Select a dropdown option by value on the element with the given index.",
            schema_for!(SelectParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .register(entry(
            "capture",
            "Save a screenshot of the page (full_page for the whole document).",
            schema_for!(CaptureParams),
            CommandNeeds::browser(),
            false,
        ))
        .register(entry(
            "read_page",
            "Return the readable text of the current page.",
            schema_for!(ReadPageParams),
            CommandNeeds::browser(),
            false,
        ))
        .register(entry(
            "wait",
            "Pause for the given number of milliseconds (max 30000).",
            schema_for!(WaitParams),
            CommandNeeds::none(),
            false,
        ))
        .register(entry(
            "find",
            "List interactive elements whose text or label matches a query.",
            schema_for!(FindParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .register(entry(
            "list_options",
            "List the options of the dropdown with the given index.",
            schema_for!(ListOptionsParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .register(entry(
            "pick_option",
            "Pick a dropdown option by its visible label on the element with the given index.",
            schema_for!(PickOptionParams),
            CommandNeeds::analyzer(),
            false,
        ))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_registers_all_commands() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), Command::ALL_NAMES.len());
        for name in Command::ALL_NAMES {
            assert!(catalog.get(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn exclude_set_drops_entries() {
        let catalog =
            default_catalog_with(CatalogBuilder::new().exclude(["upload", "capture"]));
        assert!(catalog.get("upload").is_none());
        assert!(catalog.get("capture").is_none());
        assert!(catalog.get("navigate").is_some());
    }

    #[test]
    fn include_set_restricts_entries() {
        let catalog = default_catalog_with(
            CatalogBuilder::new().include(["navigate", "tap", "finish"]),
        );
        assert_eq!(catalog.names(), vec!["finish", "navigate", "tap"]);
    }

    #[test]
    fn domain_filter_hides_entries_off_domain() {
        let mut special = entry(
            "web_search",
            "site-specific search",
            schema_for!(crate::model::WebSearchParams),
            CommandNeeds::browser(),
            true,
        );
        special.domain_filter = Some(vec!["example.com".to_string()]);
        let catalog = CatalogBuilder::new()
            .register(special)
            .register(entry(
                "wait",
                "wait",
                schema_for!(crate::model::WaitParams),
                CommandNeeds::none(),
                false,
            ))
            .build();

        let on_domain = catalog.describe_for(Some("https://www.example.com/search"));
        assert!(on_domain.contains("web_search"));

        let off_domain = catalog.describe_for(Some("https://other.io/"));
        assert!(!off_domain.contains("web_search"));
        assert!(off_domain.contains("wait"));

        // Subdomains of the base domain still match.
        let subdomain = catalog.describe_for(Some("https://shop.example.com/"));
        assert!(subdomain.contains("web_search"));
    }

    #[test]
    fn finish_terminates_sequence() {
        let catalog = default_catalog();
        assert!(catalog.get("finish").unwrap().terminates_sequence);
        assert!(!catalog.get("tap").unwrap().terminates_sequence);
    }
}
