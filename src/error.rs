use thiserror::Error;

/// Error types for the param-rs library.
///
/// Errors are `Clone` so that reactive expressions can cache a failure and
/// hand the same error back on every read until they are invalidated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    /// A parameter name was not declared on the class it was looked up on.
    #[error("{name} parameter was not found in list of parameters of class {class}")]
    ParameterNotFound { name: String, class: String },

    /// A method name was not declared on the class it was looked up on.
    #[error("Method '{name}' not found on class {class}")]
    MethodNotFound { name: String, class: String },

    /// An attribute in a dependency chain could not be found on the live object.
    #[error("Attribute '{attr}' could not be resolved on {owner}")]
    AttributeNotResolved { attr: String, owner: String },

    /// A dependency string could not be parsed.
    #[error("Invalid dependency specification '{spec}': {message}")]
    InvalidSpec { spec: String, message: String },

    /// String specs and parameter references were combined in one declaration.
    #[error(
        "Dependencies must either be defined as strings referencing parameters on the class \
         defining the decorated method or as parameter instances. Mixing of string specs and \
         parameter instances is not supported."
    )]
    MixedDependencies,

    /// Keyword dependencies were combined with string specs.
    #[error(
        "Supplying keywords to the decorated method or function is not supported when \
         referencing parameters by name."
    )]
    KeywordsWithStringSpecs,

    /// A dependency was neither a string, a parameter reference nor a dependent function.
    #[error(
        "The depends decorator only accepts string types referencing a parameter or parameter \
         instances, found {found} type instead."
    )]
    InvalidDependency { found: String },

    /// String specs need a class to resolve against.
    #[error("String dependencies can only be declared on methods, not on function '{function}'")]
    StringSpecOnFunction { function: String },

    /// User watchers may not use the precedence range reserved for internal watchers.
    #[error(
        "User-defined watch callbacks must declare a positive precedence. Negative precedences \
         are reserved for internal Watchers."
    )]
    NegativePrecedence,

    /// Attempt to modify a constant parameter after construction.
    #[error("Constant parameter '{name}' cannot be modified")]
    ConstantParameter { name: String },

    /// Attempt to modify a read-only parameter.
    #[error("Read-only parameter '{name}' cannot be modified")]
    ReadOnlyParameter { name: String },

    /// A parameter validator rejected a value.
    #[error("Validation failed for parameter '{name}': {message}")]
    Validation { name: String, message: String },

    /// An asynchronous callback was encountered without an executor being configured.
    #[error(
        "Could not execute {function} asynchronously. Register an asynchronous executor on \
         the context, which schedules the function on an event loop."
    )]
    NoAsyncExecutor { function: String },

    /// A reactive expression that is not a settable root was assigned to.
    #[error("{0}")]
    ReadOnlyExpression(String),

    /// An operation was applied to values of unsupported types.
    #[error("Type error: {0}")]
    TypeError(String),

    /// An operation received a value of the right type but an invalid content.
    #[error("Value error: {0}")]
    ValueError(String),

    /// A sequence index was out of range.
    #[error("Index error: {0}")]
    IndexError(String),

    /// A mapping key was missing.
    #[error("Key error: {0}")]
    KeyError(String),

    /// An iterator was advanced past its end.
    #[error("Iterator exhausted")]
    StopIteration,

    /// Division or modulo by zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// Error raised from a user callback.
    #[error("Callback error: {0}")]
    Callback(String),

    /// A diagnostic warning promoted to an error.
    #[error("Warning raised as error: {0}")]
    Warning(String),

    /// Sentinel aborting an evaluation without being treated as a failure.
    #[error("Evaluation skipped")]
    Skip,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl ParamError {
    /// Whether this error is the [`ParamError::Skip`] sentinel.
    pub fn is_skip(&self) -> bool {
        matches!(self, ParamError::Skip)
    }
}

/// Result type for param-rs operations.
pub type Result<T> = std::result::Result<T, ParamError>;

impl From<String> for ParamError {
    fn from(s: String) -> Self {
        ParamError::Other(s)
    }
}

impl From<&str> for ParamError {
    fn from(s: &str) -> Self {
        ParamError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for ParamError {
    fn from(err: serde_json::Error) -> Self {
        ParamError::JsonError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParamError::ParameterNotFound {
            name: "c".to_string(),
            class: "P".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "c parameter was not found in list of parameters of class P"
        );

        let err = ParamError::InvalidDependency {
            found: "int".to_string(),
        };
        assert!(err.to_string().contains("found int type instead"));

        let err = ParamError::AttributeNotResolved {
            attr: "vlaue".to_string(),
            owner: "Sub00002".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Attribute 'vlaue' could not be resolved on Sub00002"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: ParamError = "something went wrong".into();
        assert_eq!(err, ParamError::Other("something went wrong".to_string()));

        let err: ParamError = String::from("owned").into();
        assert!(matches!(err, ParamError::Other(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ParamError = json_err.into();
        assert!(matches!(err, ParamError::JsonError(_)));
    }

    #[test]
    fn test_skip_sentinel() {
        assert!(ParamError::Skip.is_skip());
        assert!(!ParamError::DivisionByZero.is_skip());
    }
}
