//! Router and navigation options
//!
//! [`RouterOptions`] configures a router for its whole lifetime;
//! [`NavigationOptions`] extends it per navigation (title, target scope,
//! query/fragment, history state). Both follow the builder pattern and have
//! sensible defaults that allow the router to function out of the box.
//!
//! # Example
//! ```rust,ignore
//! use lumen_router::{RouterOptions, SwapStrategy, ResolutionMode};
//!
//! let options = RouterOptions::new()
//!     .with_swap_strategy(SwapStrategy::SequentialAddFirst)
//!     .with_resolution_mode(ResolutionMode::Static)
//!     .with_title_separator(" — ");
//! options.validate()?;
//! ```

use crate::error::{RouterError, RouterResult};
use crate::instruction::{Params, ViewportInstructionTree};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Strategy Enums
// =============================================================================

/// How a committed navigation is written to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum HistoryStrategy {
    /// Push a new history entry.
    #[default]
    Push,
    /// Replace the current history entry.
    Replace,
    /// Do not touch history.
    None,
}

/// How a navigation whose instructions match the current state is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum SameUrlStrategy {
    /// Resolve the call `false` without running the pipeline.
    #[default]
    Ignore,
    /// Run the full pipeline anyway.
    Reload,
}

/// Ordering of deactivation vs. activation when a viewport replaces its
/// component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum SwapStrategy {
    /// Deactivate the outgoing component, then activate the incoming one.
    #[default]
    SequentialRemoveFirst,
    /// Activate the incoming component, then deactivate the outgoing one.
    SequentialAddFirst,
    /// Deactivate the outgoing component concurrently with the incoming
    /// activation (including its dynamically-discovered children).
    ParallelRemoveFirst,
}

/// When viewports become available for route resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ResolutionMode {
    /// A viewport only becomes available once its host component is active.
    /// Enables routing into children of not-yet-loaded components.
    #[default]
    Dynamic,
    /// The whole tree is resolved eagerly, all at once.
    Static,
}

/// How component names in navigation requests are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum RoutingMode {
    /// Try configured routes first, then fall back to direct resolution by
    /// component name, then to the viewport's fallback.
    #[default]
    ConfiguredFirst,
    /// Only configured routes match; anything else is an error.
    ConfiguredOnly,
}

// =============================================================================
// Per-navigation strategy selection
// =============================================================================

/// A strategy that is either fixed or computed from the instructions of the
/// navigation it applies to.
#[derive(Clone)]
pub enum ValueOrFunc<T> {
    /// Use this value for every navigation.
    Value(T),
    /// Evaluate per navigation.
    Func(Arc<dyn Fn(&ViewportInstructionTree) -> T + Send + Sync>),
}

impl<T: Copy> ValueOrFunc<T> {
    /// Resolve the strategy for a concrete navigation.
    pub fn resolve(&self, instructions: &ViewportInstructionTree) -> T {
        match self {
            Self::Value(value) => *value,
            Self::Func(func) => func(instructions),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueOrFunc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value:?}"),
            Self::Func(_) => write!(f, "<computed>"),
        }
    }
}

impl<T> From<T> for ValueOrFunc<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

// =============================================================================
// Router Options
// =============================================================================

/// Router-wide configuration.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// History strategy applied to committed navigations (default: push).
    pub history_strategy: ValueOrFunc<HistoryStrategy>,
    /// Handling of navigations that match the current state (default: ignore).
    pub same_url_strategy: ValueOrFunc<SameUrlStrategy>,
    /// Ordering of component replacement within one viewport.
    pub swap_strategy: SwapStrategy,
    /// When viewports become available for resolution.
    pub resolution_mode: ResolutionMode,
    /// How component names are resolved against route tables.
    pub routing_mode: RoutingMode,
    /// Separator between composed title fragments (default: `" | "`).
    pub title_separator: String,
    /// Whether the router composes and applies document titles.
    pub build_title: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            history_strategy: ValueOrFunc::Value(HistoryStrategy::Push),
            same_url_strategy: ValueOrFunc::Value(SameUrlStrategy::Ignore),
            swap_strategy: SwapStrategy::default(),
            resolution_mode: ResolutionMode::default(),
            routing_mode: RoutingMode::default(),
            title_separator: " | ".to_string(),
            build_title: true,
        }
    }
}

impl RouterOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the history strategy.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_history_strategy(mut self, strategy: impl Into<ValueOrFunc<HistoryStrategy>>) -> Self {
        self.history_strategy = strategy.into();
        self
    }

    /// Set the same-URL strategy.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_same_url_strategy(
        mut self,
        strategy: impl Into<ValueOrFunc<SameUrlStrategy>>,
    ) -> Self {
        self.same_url_strategy = strategy.into();
        self
    }

    /// Set the swap strategy.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_swap_strategy(mut self, strategy: SwapStrategy) -> Self {
        self.swap_strategy = strategy;
        self
    }

    /// Set the resolution mode.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_resolution_mode(mut self, mode: ResolutionMode) -> Self {
        self.resolution_mode = mode;
        self
    }

    /// Set the routing mode.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_routing_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = mode;
        self
    }

    /// Set the title separator.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_title_separator(mut self, separator: impl Into<String>) -> Self {
        self.title_separator = separator.into();
        self
    }

    /// Enable or disable title composition.
    #[must_use = "This method returns a new RouterOptions and does not modify self"]
    pub fn with_build_title(mut self, build_title: bool) -> Self {
        self.build_title = build_title;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> RouterResult<()> {
        if self.build_title && self.title_separator.is_empty() {
            return Err(RouterError::invalid_options(
                "title_separator must not be empty while build_title is enabled",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Navigation Options
// =============================================================================

/// Per-navigation options: router-wide settings plus the knobs that only make
/// sense for one `load()` call.
#[derive(Clone)]
pub struct NavigationOptions {
    /// History strategy for this navigation.
    pub history_strategy: ValueOrFunc<HistoryStrategy>,
    /// Same-URL strategy for this navigation.
    pub same_url_strategy: ValueOrFunc<SameUrlStrategy>,
    /// Swap strategy for this navigation.
    pub swap_strategy: SwapStrategy,
    /// Resolution mode for this navigation.
    pub resolution_mode: ResolutionMode,
    /// Routing mode for this navigation.
    pub routing_mode: RoutingMode,
    /// Title override for this navigation.
    pub title: Option<String>,
    /// Separator between composed title fragments.
    pub title_separator: String,
    /// Whether titles are composed and applied.
    pub build_title: bool,
    /// Treat the instructions as appending siblings instead of replacing.
    pub append: bool,
    /// Routing scope the instructions are relative to (`None` = root).
    pub context: Option<Arc<crate::context::RouteContext>>,
    /// Query parameters attached to the navigation.
    pub query_params: Params,
    /// URL fragment attached to the navigation.
    pub fragment: Option<String>,
    /// Application state stored with the history entry.
    pub state: Option<serde_json::Value>,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self::from_router_options(&RouterOptions::default())
    }
}

impl fmt::Debug for NavigationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationOptions")
            .field("history_strategy", &self.history_strategy)
            .field("same_url_strategy", &self.same_url_strategy)
            .field("swap_strategy", &self.swap_strategy)
            .field("resolution_mode", &self.resolution_mode)
            .field("routing_mode", &self.routing_mode)
            .field("title", &self.title)
            .field("append", &self.append)
            .field("has_context", &self.context.is_some())
            .field("query_params", &self.query_params)
            .field("fragment", &self.fragment)
            .finish()
    }
}

impl NavigationOptions {
    /// Derive navigation options from router-wide options.
    pub fn from_router_options(options: &RouterOptions) -> Self {
        Self {
            history_strategy: options.history_strategy.clone(),
            same_url_strategy: options.same_url_strategy.clone(),
            swap_strategy: options.swap_strategy,
            resolution_mode: options.resolution_mode,
            routing_mode: options.routing_mode,
            title: None,
            title_separator: options.title_separator.clone(),
            build_title: options.build_title,
            append: false,
            context: None,
            query_params: Params::new(),
            fragment: None,
            state: None,
        }
    }

    /// Set the title override.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the history strategy for this navigation.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_history_strategy(mut self, strategy: impl Into<ValueOrFunc<HistoryStrategy>>) -> Self {
        self.history_strategy = strategy.into();
        self
    }

    /// Set the same-URL strategy for this navigation.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_same_url_strategy(
        mut self,
        strategy: impl Into<ValueOrFunc<SameUrlStrategy>>,
    ) -> Self {
        self.same_url_strategy = strategy.into();
        self
    }

    /// Set append mode.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Make the instructions relative to a routing scope.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_context(mut self, context: Arc<crate::context::RouteContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach query parameters.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_query_params(mut self, query_params: Params) -> Self {
        self.query_params = query_params;
        self
    }

    /// Attach a URL fragment.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Attach application history state.
    #[must_use = "This method returns a new NavigationOptions and does not modify self"]
    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = Some(state);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RouterOptions::default();
        assert!(matches!(
            options.history_strategy,
            ValueOrFunc::Value(HistoryStrategy::Push)
        ));
        assert!(matches!(
            options.same_url_strategy,
            ValueOrFunc::Value(SameUrlStrategy::Ignore)
        ));
        assert_eq!(options.swap_strategy, SwapStrategy::SequentialRemoveFirst);
        assert_eq!(options.resolution_mode, ResolutionMode::Dynamic);
        assert_eq!(options.routing_mode, RoutingMode::ConfiguredFirst);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = RouterOptions::new()
            .with_swap_strategy(SwapStrategy::ParallelRemoveFirst)
            .with_resolution_mode(ResolutionMode::Static)
            .with_routing_mode(RoutingMode::ConfiguredOnly)
            .with_title_separator(" — ");
        assert_eq!(options.swap_strategy, SwapStrategy::ParallelRemoveFirst);
        assert_eq!(options.resolution_mode, ResolutionMode::Static);
        assert_eq!(options.routing_mode, RoutingMode::ConfiguredOnly);
        assert_eq!(options.title_separator, " — ");
    }

    #[test]
    fn test_validation_rejects_empty_separator() {
        let options = RouterOptions::new().with_title_separator("");
        assert!(options.validate().is_err());

        let options = RouterOptions::new()
            .with_title_separator("")
            .with_build_title(false);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_computed_strategy_resolves_per_navigation() {
        let strategy: ValueOrFunc<HistoryStrategy> = ValueOrFunc::Func(Arc::new(|tree| {
            if tree.children.is_empty() {
                HistoryStrategy::None
            } else {
                HistoryStrategy::Push
            }
        }));
        let empty = ViewportInstructionTree::empty(NavigationOptions::default());
        assert_eq!(strategy.resolve(&empty), HistoryStrategy::None);
    }

    #[test]
    fn test_navigation_options_inherit_router_options() {
        let router_options = RouterOptions::new().with_resolution_mode(ResolutionMode::Static);
        let nav = NavigationOptions::from_router_options(&router_options);
        assert_eq!(nav.resolution_mode, ResolutionMode::Static);
        assert!(!nav.append);
        assert!(nav.context.is_none());
    }

    #[test]
    fn test_strategy_serde_round_trip() {
        let json = serde_json::to_string(&SwapStrategy::SequentialAddFirst).unwrap();
        assert_eq!(json, "\"sequential-add-first\"");
        let back: SwapStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SwapStrategy::SequentialAddFirst);
    }
}
