//! Route configuration
//!
//! [`RouteConfig`] is the static configuration an application attaches to a
//! routable component (or declares inline as a child route).
//! [`RouteDefinition`] is its resolved form: paths expanded, viewport
//! defaulted, redirect validated, component reference settled. Configs are
//! validated eagerly — a malformed config is a programming error surfaced at
//! registration, not at navigation time.

use crate::component::{ComponentDefinition, ComponentRegistry, LazyComponent};
use crate::error::{RouterError, RouterResult};
use crate::tree::RouteNode;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

// =============================================================================
// Transition plans
// =============================================================================

/// What lifecycle work happens when a viewport re-resolves to the same
/// component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionPlan {
    /// No lifecycle work at all.
    None,
    /// Run unload/load hooks but keep the component instance.
    InvokeLifecycles,
    /// Tear the component down and build a fresh one.
    Replace,
}

/// A transition plan that is either fixed or derived from the current and
/// next route nodes.
#[derive(Clone)]
pub enum TransitionPlanSelector {
    /// Always use this plan.
    Fixed(TransitionPlan),
    /// Compute the plan per transition.
    Dynamic(Arc<dyn Fn(&RouteNode, &RouteNode) -> TransitionPlan + Send + Sync>),
}

impl fmt::Debug for TransitionPlanSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(plan) => write!(f, "{plan:?}"),
            Self::Dynamic(_) => write!(f, "<computed>"),
        }
    }
}

impl From<TransitionPlan> for TransitionPlanSelector {
    fn from(plan: TransitionPlan) -> Self {
        Self::Fixed(plan)
    }
}

// =============================================================================
// RouteConfig
// =============================================================================

/// Static route configuration.
///
/// All fields are optional; whatever is absent is derived from the component
/// the config is attached to (name as path, `"default"` as viewport, …).
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// Stable route id; defaults to the first path.
    pub id: Option<String>,
    /// Path patterns this route matches; defaults to the component name.
    pub path: Option<Vec<String>>,
    /// Title fragment contributed to the composed document title.
    pub title: Option<String>,
    /// Redirect target; a route with a redirect has no component of its own.
    pub redirect_to: Option<String>,
    /// Whether path matching is case sensitive.
    pub case_sensitive: bool,
    /// Lifecycle policy for same-component re-resolution.
    pub transition_plan: Option<TransitionPlanSelector>,
    /// Viewport this route targets; defaults to `"default"`.
    pub viewport: Option<String>,
    /// Arbitrary data made available on matched route nodes.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Child routes, resolved in this component's scope.
    pub routes: Vec<Routeable>,
    /// Component to fall back to when a child path cannot be recognized.
    pub fallback: Option<String>,
}

impl RouteConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the route id.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set a single path pattern.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(vec![path.into()]);
        self
    }

    /// Set multiple path patterns.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.path = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Set the title fragment.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the redirect target.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_redirect_to(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    /// Set case-sensitive matching.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Set the transition plan.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_transition_plan(mut self, plan: impl Into<TransitionPlanSelector>) -> Self {
        self.transition_plan = Some(plan.into());
        self
    }

    /// Set the target viewport.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_viewport(mut self, viewport: impl Into<String>) -> Self {
        self.viewport = Some(viewport.into());
        self
    }

    /// Attach a data entry.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Set the child routes.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_routes(mut self, routes: impl IntoIterator<Item = Routeable>) -> Self {
        self.routes = routes.into_iter().collect();
        self
    }

    /// Set the fallback component.
    #[must_use = "This method returns a new RouteConfig and does not modify self"]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Validate the config shape.
    pub fn validate(&self) -> RouterResult<()> {
        if let Some(paths) = &self.path {
            for path in paths {
                if path.starts_with('/') {
                    return Err(RouterError::invalid_route_config(format!(
                        "Route path '{path}' must not start with '/'; paths are relative to their scope"
                    )));
                }
            }
        }
        if self.redirect_to.is_some() && !self.routes.is_empty() {
            return Err(RouterError::invalid_route_config(
                "A redirect route cannot declare child routes",
            ));
        }
        for routeable in &self.routes {
            routeable.validate()?;
        }
        Ok(())
    }

    /// Layer `override_config`'s present fields over `self`'s.
    pub(crate) fn merged_with(&self, override_config: &RouteConfig) -> RouteConfig {
        RouteConfig {
            id: override_config.id.clone().or_else(|| self.id.clone()),
            path: override_config.path.clone().or_else(|| self.path.clone()),
            title: override_config.title.clone().or_else(|| self.title.clone()),
            redirect_to: override_config
                .redirect_to
                .clone()
                .or_else(|| self.redirect_to.clone()),
            case_sensitive: override_config.case_sensitive || self.case_sensitive,
            transition_plan: override_config
                .transition_plan
                .clone()
                .or_else(|| self.transition_plan.clone()),
            viewport: override_config
                .viewport
                .clone()
                .or_else(|| self.viewport.clone()),
            data: if override_config.data.is_empty() {
                self.data.clone()
            } else {
                override_config.data.clone()
            },
            routes: if override_config.routes.is_empty() {
                self.routes.clone()
            } else {
                override_config.routes.clone()
            },
            fallback: override_config
                .fallback
                .clone()
                .or_else(|| self.fallback.clone()),
        }
    }
}

// =============================================================================
// Routeable
// =============================================================================

/// A reference to a routable component.
#[derive(Debug, Clone)]
pub enum ComponentRef {
    /// By registered name.
    Name(String),
    /// An already-resolved definition.
    Definition(Arc<ComponentDefinition>),
    /// A lazy loader.
    Lazy(LazyComponent),
}

/// One entry of a `routes` table.
#[derive(Debug, Clone)]
pub enum Routeable {
    /// A bare component; its own config supplies path/viewport/etc.
    Component(ComponentRef),
    /// The child-route form: a component with per-route config overrides.
    Configured {
        /// The component being routed to.
        component: ComponentRef,
        /// Overrides layered over the component's own config.
        config: RouteConfig,
    },
    /// The pure-redirect form: mandatory `path` + `redirect_to`, no component.
    Redirect {
        /// Must carry `path` and `redirect_to`.
        config: RouteConfig,
    },
}

impl Routeable {
    /// Route to a component by registered name.
    pub fn component(name: impl Into<String>) -> Self {
        Self::Component(ComponentRef::Name(name.into()))
    }

    /// Route to a resolved component definition.
    pub fn definition(definition: Arc<ComponentDefinition>) -> Self {
        Self::Component(ComponentRef::Definition(definition))
    }

    /// Route to a lazily loaded component.
    pub fn lazy(loader: LazyComponent) -> Self {
        Self::Component(ComponentRef::Lazy(loader))
    }

    /// Child-route form with config overrides.
    pub fn configured(component: ComponentRef, config: RouteConfig) -> Self {
        Self::Configured { component, config }
    }

    /// Pure-redirect form.
    pub fn redirect(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Redirect {
            config: RouteConfig::new()
                .with_path(path)
                .with_redirect_to(target),
        }
    }

    /// Validate the routeable shape.
    pub fn validate(&self) -> RouterResult<()> {
        match self {
            Self::Component(_) => Ok(()),
            Self::Configured { config, .. } => {
                if config.redirect_to.is_some() {
                    return Err(RouterError::invalid_route_config(
                        "A child route with a component cannot also declare redirect_to",
                    ));
                }
                config.validate()
            }
            Self::Redirect { config } => {
                if config.redirect_to.is_none() {
                    return Err(RouterError::invalid_route_config(
                        "A redirect route requires redirect_to",
                    ));
                }
                if config.path.as_ref().is_none_or(|p| p.is_empty()) {
                    return Err(RouterError::invalid_route_config(
                        "A redirect route requires at least one path",
                    ));
                }
                config.validate()
            }
        }
    }

    /// Resolve into a route definition; lazy references are loaded here.
    pub(crate) fn resolve(
        &self,
        registry: &Arc<ComponentRegistry>,
    ) -> BoxFuture<'static, RouterResult<Arc<RouteDefinition>>> {
        match self {
            Self::Component(component) => resolve_ref(component.clone(), None, registry),
            Self::Configured { component, config } => {
                resolve_ref(component.clone(), Some(config.clone()), registry)
            }
            Self::Redirect { config } => {
                let result = RouteDefinition::redirect(config);
                Box::pin(async move { result })
            }
        }
    }
}

fn resolve_ref(
    component: ComponentRef,
    override_config: Option<RouteConfig>,
    registry: &Arc<ComponentRegistry>,
) -> BoxFuture<'static, RouterResult<Arc<RouteDefinition>>> {
    let registry = Arc::clone(registry);
    Box::pin(async move {
        let definition = match component {
            ComponentRef::Name(name) => registry.resolve(&name)?,
            ComponentRef::Definition(definition) => definition,
            ComponentRef::Lazy(loader) => loader.load().await.map_err(|err| {
                RouterError::component_load_failure(format!(
                    "Lazy component failed to load: {err}"
                ))
            })?,
        };
        match override_config {
            None => Ok(definition.route_definition()),
            Some(config) => {
                config.validate()?;
                Ok(RouteDefinition::for_component(definition, Some(&config)))
            }
        }
    })
}

// =============================================================================
// RouteDefinition
// =============================================================================

/// Resolved route configuration: what the recognizer and tree builder consume.
pub struct RouteDefinition {
    /// Stable route id.
    pub id: String,
    /// Path patterns, in declaration order.
    pub path: Vec<String>,
    /// Redirect target; `Some` only for pure-redirect routes.
    pub redirect_to: Option<String>,
    /// Whether path matching is case sensitive.
    pub case_sensitive: bool,
    /// Target viewport name.
    pub viewport: String,
    /// Title fragment.
    pub title: Option<String>,
    /// Route data.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Fallback component for unrecognized children.
    pub fallback: Option<String>,
    /// The routed component; `None` for pure redirects.
    pub component: Option<Arc<ComponentDefinition>>,
    /// Child routes declared in this route's scope.
    pub routes: Vec<Routeable>,
    transition_plan: Option<TransitionPlanSelector>,
}

impl RouteDefinition {
    /// Resolve a definition for a component, optionally layered with
    /// child-route overrides.
    pub(crate) fn for_component(
        component: Arc<ComponentDefinition>,
        override_config: Option<&RouteConfig>,
    ) -> Arc<Self> {
        let config = match override_config {
            Some(overrides) => component.config.merged_with(overrides),
            None => component.config.clone(),
        };
        let path = config.path.clone().unwrap_or_else(|| {
            let mut paths = vec![component.name.clone()];
            paths.extend(component.aliases.iter().cloned());
            paths
        });
        let id = config
            .id
            .clone()
            .or_else(|| path.iter().find(|p| !p.is_empty()).cloned())
            .unwrap_or_else(|| component.name.clone());
        trace!(component = %component.name, id = %id, "resolved route definition");
        Arc::new(Self {
            id,
            path,
            redirect_to: config.redirect_to.clone(),
            case_sensitive: config.case_sensitive,
            viewport: config
                .viewport
                .clone()
                .unwrap_or_else(|| crate::viewport::DEFAULT_VIEWPORT_NAME.to_string()),
            title: config.title.clone(),
            data: config.data.clone(),
            fallback: config.fallback.clone(),
            transition_plan: config.transition_plan.clone(),
            routes: config.routes.clone(),
            component: Some(component),
        })
    }

    /// Resolve a pure-redirect definition.
    pub(crate) fn redirect(config: &RouteConfig) -> RouterResult<Arc<Self>> {
        let path = config
            .path
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                RouterError::invalid_route_config("A redirect route requires at least one path")
            })?;
        let redirect_to = config.redirect_to.clone().ok_or_else(|| {
            RouterError::invalid_route_config("A redirect route requires redirect_to")
        })?;
        config.validate()?;
        Ok(Arc::new(Self {
            id: config.id.clone().unwrap_or_else(|| path[0].clone()),
            path,
            redirect_to: Some(redirect_to),
            case_sensitive: config.case_sensitive,
            viewport: config
                .viewport
                .clone()
                .unwrap_or_else(|| crate::viewport::DEFAULT_VIEWPORT_NAME.to_string()),
            title: config.title.clone(),
            data: config.data.clone(),
            fallback: config.fallback.clone(),
            transition_plan: config.transition_plan.clone(),
            routes: Vec::new(),
            component: None,
        }))
    }

    /// The transition plan for re-resolving `current` into `next` on the same
    /// viewport. Defaults to `none` when the params are unchanged and
    /// `invoke-lifecycles` when they differ.
    pub fn transition_plan_for(&self, current: &RouteNode, next: &RouteNode) -> TransitionPlan {
        match &self.transition_plan {
            Some(TransitionPlanSelector::Fixed(plan)) => *plan,
            Some(TransitionPlanSelector::Dynamic(select)) => select(current, next),
            None => {
                if current.params() == next.params() {
                    TransitionPlan::None
                } else {
                    TransitionPlan::InvokeLifecycles
                }
            }
        }
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("redirect_to", &self.redirect_to)
            .field("viewport", &self.viewport)
            .field(
                "component",
                &self.component.as_ref().map(|c| c.name.as_str()),
            )
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::RouteComponent;

    struct PlainComponent;
    impl RouteComponent for PlainComponent {}

    fn plain(name: &str) -> Arc<ComponentDefinition> {
        ComponentDefinition::simple(name, || Arc::new(PlainComponent))
    }

    #[test]
    fn test_definition_defaults_from_component() {
        let def = plain("products").route_definition();
        assert_eq!(def.path, vec!["products".to_string()]);
        assert_eq!(def.id, "products");
        assert_eq!(def.viewport, "default");
        assert!(def.redirect_to.is_none());
    }

    #[test]
    fn test_child_overrides_layer_over_component_config() {
        let component = ComponentDefinition::new(
            "detail",
            RouteConfig::new().with_title("Detail").with_viewport("main"),
            || Arc::new(PlainComponent),
        );
        let overridden = RouteDefinition::for_component(
            component,
            Some(&RouteConfig::new().with_path("items/:id")),
        );
        assert_eq!(overridden.path, vec!["items/:id".to_string()]);
        assert_eq!(overridden.title.as_deref(), Some("Detail"));
        assert_eq!(overridden.viewport, "main");
    }

    #[test]
    fn test_redirect_definition_requires_path_and_target() {
        let ok = RouteDefinition::redirect(
            &RouteConfig::new().with_path("old").with_redirect_to("new"),
        );
        assert!(ok.is_ok());
        assert!(ok.unwrap().component.is_none());

        let missing_target = RouteDefinition::redirect(&RouteConfig::new().with_path("old"));
        assert!(missing_target.is_err());

        let missing_path = RouteDefinition::redirect(&RouteConfig::new().with_redirect_to("new"));
        assert!(missing_path.is_err());
    }

    #[test]
    fn test_validate_rejects_absolute_paths() {
        let config = RouteConfig::new().with_path("/absolute");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, crate::error::RouterErrorCode::InvalidRouteConfig);
    }

    #[test]
    fn test_validate_rejects_redirect_with_children() {
        let config = RouteConfig::new()
            .with_path("a")
            .with_redirect_to("b")
            .with_routes([Routeable::component("c")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_routeable_validation() {
        assert!(Routeable::component("a").validate().is_ok());
        assert!(Routeable::redirect("old", "new").validate().is_ok());

        let bad = Routeable::Configured {
            component: ComponentRef::Name("a".into()),
            config: RouteConfig::new().with_redirect_to("b"),
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_resolve_by_name_through_registry() {
        let registry = ComponentRegistry::new();
        registry.register(plain("users"));
        let def = Routeable::component("users")
            .resolve(&registry)
            .await
            .unwrap();
        assert_eq!(def.id, "users");

        let err = Routeable::component("ghost").resolve(&registry).await;
        assert!(err.is_err());
    }

    #[test]
    fn test_fixed_transition_plan_wins() {
        let component = ComponentDefinition::new(
            "pinned",
            RouteConfig::new().with_transition_plan(TransitionPlan::Replace),
            || Arc::new(PlainComponent),
        );
        let def = component.route_definition();
        match &def.transition_plan {
            Some(TransitionPlanSelector::Fixed(plan)) => {
                assert_eq!(*plan, TransitionPlan::Replace)
            }
            other => panic!("expected fixed plan, got {other:?}"),
        }
    }
}
