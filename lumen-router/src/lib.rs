#![warn(missing_docs)]
//! # Lumen Router
//!
//! The viewport-based navigation engine of the Lumen component framework:
//! route resolution, guarded transitions, nested viewports, and history
//! integration — independent of how components render.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Application                          │
//! │  ┌──────────────┐  ┌───────────────┐  ┌─────────────────┐   │
//! │  │ load()/href  │  │ Route configs │  │ Event consumers │   │
//! │  └──────┬───────┘  └───────┬───────┘  └────────▲────────┘   │
//! └─────────┼──────────────────┼───────────────────┼────────────┘
//! ┌─────────▼──────────────────▼───────────────────┼────────────┐
//! │                         Router                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────┴─────────┐  │
//! │  │ Expression   │  │ Route tree   │  │ Event bus         │  │
//! │  │ parser       │──│ construction │  │ History manager   │  │
//! │  └──────────────┘  └──────┬───────┘  └───────────────────┘  │
//! │                           │                                 │
//! │  ┌────────────────────────▼─────────────────────────────┐   │
//! │  │ ViewportAgent state machines                         │   │
//! │  │ can_unload → can_load → unload → load → swap         │   │
//! │  │ sequenced by Batch, bridged by Transition::run       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lumen_router::prelude::*;
//! use std::sync::Arc;
//!
//! struct HomePage;
//! impl RouteComponent for HomePage {}
//!
//! # async fn demo() -> RouterResult<()> {
//! let registry = ComponentRegistry::new();
//! registry.register(ComponentDefinition::simple("home", || Arc::new(HomePage)));
//!
//! let app_root = ComponentDefinition::new(
//!     "app-root",
//!     RouteConfig::new().with_routes([Routeable::component("home")]),
//!     || Arc::new(HomePage),
//! );
//!
//! let location = MemoryLocationManager::new();
//! let router = Router::new(registry, location, RouterOptions::default())?;
//! router.start(app_root, false).await?;
//! router.root_context()?.register_viewport(Viewport::default());
//!
//! let committed = router.load("home", None).await?;
//! assert!(committed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guards and redirects
//!
//! Components implement [`RouteComponent`]; every hook is optional:
//!
//! ```rust,ignore
//! #[async_trait]
//! impl RouteComponent for Settings {
//!     async fn can_load(
//!         &self,
//!         _params: &Params,
//!         _next: &RouteNode,
//!         _current: Option<&RouteNode>,
//!     ) -> RouterResult<CanLoadResult> {
//!         if self.session.is_authenticated() {
//!             Ok(CanLoadResult::Allow)
//!         } else {
//!             Ok(CanLoadResult::Redirect("login".into()))
//!         }
//!     }
//! }
//! ```
//!
//! A denial resolves the `load()` call `false` and restores the previous
//! state; a redirect chains the original caller onto the redirected
//! navigation, so the promise settles only once the final target activated.
//!
//! ## Module Structure
//!
//! - [`Router`] - transition coordinator and public navigation API
//! - [`ViewportAgent`](viewport::ViewportAgent) - per-viewport state machine
//! - [`RouteTree`]/[`RouteNode`] - resolved navigation state
//! - [`ViewportInstructionTree`] - normalized navigation requests
//! - [`RouteExpression`](expression::RouteExpression) - route-string AST
//! - [`Batch`] - continuation sequencing for tree-shaped lifecycle work
//! - [`RouteConfig`]/[`RouteDefinition`] - static and resolved route config
//! - [`LocationManager`] - the history collaborator seam

pub mod batch;
pub mod component;
pub mod context;
mod error;
pub mod events;
pub mod expression;
pub mod history;
pub mod instruction;
pub mod options;
pub mod recognizer;
pub mod route_config;
pub mod router;
pub mod transition;
pub mod tree;
pub mod viewport;

#[cfg(test)]
mod tests;

// Public API
pub use batch::Batch;
pub use component::{
    CanLoadResult, ComponentDefinition, ComponentInstance, ComponentRegistry, LazyComponent,
    NavigationHook, RouteComponent,
};
pub use context::RouteContext;
pub use error::{RouterError, RouterErrorCode, RouterResult};
pub use events::{EventSubscription, RouterEvent, RouterEventBus};
pub use expression::RouteExpression;
pub use history::{LocationChange, LocationListener, LocationManager, MemoryLocationManager, NAV_ID_KEY};
pub use instruction::{
    NavigationInstruction, NavigationRequest, NavigationTrigger, Params, ViewportInstruction,
    ViewportInstructionTree,
};
pub use options::{
    HistoryStrategy, NavigationOptions, ResolutionMode, RouterOptions, RoutingMode,
    SameUrlStrategy, SwapStrategy, ValueOrFunc,
};
pub use recognizer::{RecognizedRoute, RouteRecognizer};
pub use route_config::{
    ComponentRef, RouteConfig, RouteDefinition, Routeable, TransitionPlan, TransitionPlanSelector,
};
pub use router::Router;
pub use transition::{GuardsResult, Navigation, Transition};
pub use tree::{RouteNode, RouteTree};
pub use viewport::{DEFAULT_VIEWPORT_NAME, Viewport, ViewportAgent, ViewportRequest};

/// Prelude for convenient imports.
///
/// ```rust,ignore
/// use lumen_router::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Batch,
        CanLoadResult,
        ComponentDefinition,
        ComponentRegistry,
        GuardsResult,
        HistoryStrategy,
        LazyComponent,
        LocationManager,
        MemoryLocationManager,
        NavigationHook,
        NavigationOptions,
        NavigationRequest,
        NavigationTrigger,
        Params,
        ResolutionMode,
        RouteComponent,
        RouteConfig,
        RouteContext,
        RouteNode,
        RouteTree,
        Routeable,
        Router,
        RouterError,
        RouterErrorCode,
        RouterEvent,
        RouterOptions,
        RouterResult,
        RoutingMode,
        SameUrlStrategy,
        SwapStrategy,
        TransitionPlan,
        Viewport,
        ViewportInstruction,
        ViewportInstructionTree,
    };
    pub use async_trait::async_trait;
}
