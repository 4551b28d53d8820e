//! Error types for navigation operations
//!
//! This module provides type-safe error handling for the router.
//!
//! # Error Codes
//!
//! Error codes are represented by the [`RouterErrorCode`] enum, which provides
//! exhaustive variants for the failure classes the navigation pipeline can
//! produce. When serialized, codes are converted to SCREAMING_SNAKE_CASE
//! strings for compatibility with host tooling.
//!
//! Guard denial and guard-initiated redirects are *not* errors: they travel
//! through the transition's own result machinery and never surface here.
//!
//! # Example
//! ```rust,ignore
//! use lumen_router::{RouterError, RouterErrorCode};
//!
//! let error = RouterError::new(RouterErrorCode::NoMatchingRoute, "Route 'users' not found");
//! let error = RouterError::no_matching_route("users", "root"); // Convenience method
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Type-safe error codes for navigation operations.
///
/// These codes categorize errors into configuration errors (raised while an
/// application registers routes), resolution errors (raised while a request is
/// being matched against the route tables), and internal errors (invariant
/// violations inside the pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum RouterErrorCode {
    // Configuration errors
    /// A route configuration object is malformed
    InvalidRouteConfig,
    /// A redirect pair uses expression forms the rewriter does not support
    InvalidRedirectConfig,
    /// Router or navigation options failed validation
    InvalidOptions,

    // Resolution errors
    /// A route string could not be parsed
    ExpressionParseError,
    /// No route matched and no fallback was available
    NoMatchingRoute,
    /// A component name was recognized but is not registered as a route
    ComponentNotConfigured,
    /// No registered component exists under the requested name
    ComponentNotFound,
    /// No viewport in the target context can host the requested component
    ViewportUnavailable,
    /// A routing scope was required but missing
    MissingContext,
    /// A lazy component loader failed
    ComponentLoadFailure,

    // Internal errors
    /// A viewport agent observed a state its current operation cannot accept
    UnexpectedState,
    /// An application-provided lifecycle hook failed
    HookError,
    /// An unexpected internal error occurred
    InternalError,
}

impl RouterErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRouteConfig => "INVALID_ROUTE_CONFIG",
            Self::InvalidRedirectConfig => "INVALID_REDIRECT_CONFIG",
            Self::InvalidOptions => "INVALID_OPTIONS",
            Self::ExpressionParseError => "EXPRESSION_PARSE_ERROR",
            Self::NoMatchingRoute => "NO_MATCHING_ROUTE",
            Self::ComponentNotConfigured => "COMPONENT_NOT_CONFIGURED",
            Self::ComponentNotFound => "COMPONENT_NOT_FOUND",
            Self::ViewportUnavailable => "VIEWPORT_UNAVAILABLE",
            Self::MissingContext => "MISSING_CONTEXT",
            Self::ComponentLoadFailure => "COMPONENT_LOAD_FAILURE",
            Self::UnexpectedState => "UNEXPECTED_STATE",
            Self::HookError => "HOOK_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error is caused by application configuration or
    /// input and must be fixed in app code.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRouteConfig | Self::InvalidRedirectConfig | Self::InvalidOptions
        )
    }

    /// Returns true if this error indicates a framework invariant violation
    /// rather than a recoverable condition.
    pub fn is_internal_error(&self) -> bool {
        matches!(self, Self::UnexpectedState | Self::InternalError)
    }
}

impl fmt::Display for RouterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Navigation error with type-safe code and message.
///
/// # Example
/// ```rust,ignore
/// use lumen_router::{RouterError, RouterErrorCode};
///
/// let error = RouterError::new(RouterErrorCode::ViewportUnavailable, "No viewport 'sidebar'");
/// let error = error.with_details(serde_json::json!({"available": ["default"]}));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RouterError {
    /// Type-safe error code
    pub code: RouterErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (JSON value)
    pub details: Option<serde_json::Value>,
}

impl RouterError {
    /// Create a new error with code and message.
    pub fn new(code: RouterErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    #[must_use = "This method returns a new RouterError and does not modify self"]
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    // Convenience constructors

    /// Create an INVALID_ROUTE_CONFIG error.
    pub fn invalid_route_config(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::InvalidRouteConfig, message)
    }

    /// Create an INVALID_REDIRECT_CONFIG error.
    pub fn invalid_redirect_config(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::InvalidRedirectConfig, message)
    }

    /// Create an INVALID_OPTIONS error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::InvalidOptions, message)
    }

    /// Create an EXPRESSION_PARSE_ERROR for the given position in a route string.
    pub fn parse_error(raw: &str, index: usize, expected: impl Into<String>) -> Self {
        Self::new(
            RouterErrorCode::ExpressionParseError,
            format!(
                "Invalid route expression '{}' at index {}: {}",
                raw,
                index,
                expected.into()
            ),
        )
    }

    /// Create a NO_MATCHING_ROUTE error.
    pub fn no_matching_route(path: &str, context: &str) -> Self {
        Self::new(
            RouterErrorCode::NoMatchingRoute,
            format!("No route matched '{path}' in scope '{context}' and no fallback is configured"),
        )
    }

    /// Create a COMPONENT_NOT_CONFIGURED error.
    pub fn component_not_configured(name: &str, context: &str) -> Self {
        Self::new(
            RouterErrorCode::ComponentNotConfigured,
            format!(
                "Component '{name}' exists but is not registered as a route in scope '{context}'"
            ),
        )
    }

    /// Create a COMPONENT_NOT_FOUND error.
    pub fn component_not_found(name: &str) -> Self {
        Self::new(
            RouterErrorCode::ComponentNotFound,
            format!("No component is registered under the name '{name}'"),
        )
    }

    /// Create a VIEWPORT_UNAVAILABLE error.
    pub fn viewport_unavailable(viewport: &str, component: &str, context: &str) -> Self {
        Self::new(
            RouterErrorCode::ViewportUnavailable,
            format!(
                "No viewport '{viewport}' is available for component '{component}' in scope '{context}'"
            ),
        )
    }

    /// Create a MISSING_CONTEXT error.
    pub fn missing_context(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::MissingContext, message)
    }

    /// Create a COMPONENT_LOAD_FAILURE error.
    pub fn component_load_failure(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::ComponentLoadFailure, message)
    }

    /// Create an UNEXPECTED_STATE error for a viewport agent operation.
    ///
    /// These indicate a framework bug or an illegal concurrent mutation, not
    /// a recoverable condition.
    pub fn unexpected_state(operation: &str, agent: impl fmt::Display) -> Self {
        Self::new(
            RouterErrorCode::UnexpectedState,
            format!("Unexpected state at {operation} of {agent}"),
        )
    }

    /// Create a HOOK_ERROR error.
    pub fn hook_error(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::HookError, message)
    }

    /// Create an INTERNAL_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RouterErrorCode::InternalError, message)
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("Serialization error: {err}"))
    }
}

/// Result type alias for navigation operations.
pub type RouterResult<T> = Result<T, RouterError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&RouterErrorCode::NoMatchingRoute).unwrap();
        assert_eq!(json, "\"NO_MATCHING_ROUTE\"");

        let code: RouterErrorCode = serde_json::from_str("\"UNEXPECTED_STATE\"").unwrap();
        assert_eq!(code, RouterErrorCode::UnexpectedState);
    }

    #[test]
    fn test_error_display_includes_code() {
        let error = RouterError::no_matching_route("users", "root");
        let text = error.to_string();
        assert!(text.starts_with("[NO_MATCHING_ROUTE]"));
        assert!(text.contains("users"));
    }

    #[test]
    fn test_error_categories() {
        assert!(RouterErrorCode::InvalidRouteConfig.is_configuration_error());
        assert!(RouterErrorCode::UnexpectedState.is_internal_error());
        assert!(!RouterErrorCode::NoMatchingRoute.is_configuration_error());
        assert!(!RouterErrorCode::NoMatchingRoute.is_internal_error());
    }

    #[test]
    fn test_with_details() {
        let error = RouterError::viewport_unavailable("sidebar", "settings", "root")
            .with_details(serde_json::json!({"available": ["default"]}));
        assert!(error.details.is_some());
        assert_eq!(error.code, RouterErrorCode::ViewportUnavailable);
    }

    #[test]
    fn test_unexpected_state_message() {
        let error = RouterError::unexpected_state("can_load", "ViewportAgent(default)");
        assert!(error.message.contains("can_load"));
        assert!(error.message.contains("ViewportAgent(default)"));
    }
}
