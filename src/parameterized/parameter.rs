//! Parameter declarations
//!
//! A [`Parameter`] describes one named attribute of a class: its default
//! value, a set of facets and an optional validator. Facets are plain
//! [`Value`]s addressed by name; the well-known ones (`constant`,
//! `readonly`, `allow_refs`, `nested_refs`, `event`, `doc`, `label`) have
//! dedicated builder methods, anything else (`bounds`, `objects`, ...) can be
//! attached with [`Parameter::with_facet`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{ParamError, Result};
use crate::value::Value;

/// Validation hook run before a value is stored.
pub type Validator = Rc<dyn Fn(&Value) -> Result<()>>;

const FLAG_FACETS: [&str; 5] = ["constant", "readonly", "allow_refs", "nested_refs", "event"];

/// Declaration of a single parameter.
#[derive(Clone)]
pub struct Parameter {
    name: String,
    default: Value,
    facets: BTreeMap<String, Value>,
    validator: Option<Validator>,
}

impl Parameter {
    /// Create a parameter with the given name and default value.
    ///
    /// # Examples
    ///
    /// ```
    /// use param_rs::{Parameter, Value};
    ///
    /// let p = Parameter::new("amplitude", 1.0).constant().doc("Peak height");
    /// assert_eq!(p.name(), "amplitude");
    /// assert!(p.is_constant());
    /// assert_eq!(p.facet("doc"), Some(Value::from("Peak height")));
    /// ```
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Parameter {
            name: name.into(),
            default: default.into(),
            facets: BTreeMap::new(),
            validator: None,
        }
    }

    /// The value can only be set while an object is being constructed.
    pub fn constant(self) -> Self {
        self.with_facet("constant", true)
    }

    /// The value can never be set.
    pub fn readonly(self) -> Self {
        self.with_facet("readonly", true)
    }

    /// Accept references (parameters, dependent functions, expressions) as values.
    pub fn allow_refs(self) -> Self {
        self.with_facet("allow_refs", true)
    }

    /// Also resolve references nested inside lists, tuples and mappings.
    pub fn nested_refs(self) -> Self {
        self.with_facet("allow_refs", true).with_facet("nested_refs", true)
    }

    /// Turn the parameter into an event: a boolean that is `true` only while
    /// the change is dispatched.
    pub fn event(mut self) -> Self {
        self.default = Value::Bool(false);
        self.with_facet("event", true)
    }

    pub fn doc(self, doc: impl Into<String>) -> Self {
        self.with_facet("doc", Value::Str(doc.into()))
    }

    pub fn label(self, label: impl Into<String>) -> Self {
        self.with_facet("label", Value::Str(label.into()))
    }

    /// Attach an arbitrary facet.
    pub fn with_facet(mut self, what: impl Into<String>, value: impl Into<Value>) -> Self {
        self.facets.insert(what.into(), value.into());
        self
    }

    /// Install a validator rejecting values before they are stored.
    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + 'static,
    {
        self.validator = Some(Rc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default(&self) -> &Value {
        &self.default
    }

    /// Declared value of a facet.
    ///
    /// Boolean flags that were never set read as `false`; `default`, `name`
    /// and `label` are always available.
    pub fn facet(&self, what: &str) -> Option<Value> {
        if let Some(value) = self.facets.get(what) {
            return Some(value.clone());
        }
        match what {
            "default" => Some(self.default.clone()),
            "name" => Some(Value::Str(self.name.clone())),
            "label" => Some(Value::Str(default_label(&self.name))),
            "doc" => Some(Value::None),
            flag if FLAG_FACETS.contains(&flag) => Some(Value::Bool(false)),
            _ => None,
        }
    }

    /// Names of the facets explicitly attached to this declaration.
    pub fn facet_names(&self) -> Vec<String> {
        self.facets.keys().cloned().collect()
    }

    fn flag(&self, what: &str) -> bool {
        matches!(self.facets.get(what), Some(Value::Bool(true)))
    }

    pub fn is_constant(&self) -> bool {
        self.flag("constant")
    }

    pub fn is_readonly(&self) -> bool {
        self.flag("readonly")
    }

    pub fn allows_refs(&self) -> bool {
        self.flag("allow_refs")
    }

    pub fn resolves_nested_refs(&self) -> bool {
        self.flag("nested_refs")
    }

    pub fn is_event(&self) -> bool {
        self.flag("event")
    }

    /// Run the validator, if any.
    pub fn validate(&self, value: &Value) -> Result<()> {
        match &self.validator {
            Some(validator) => validator(value).map_err(|err| match err {
                ParamError::Validation { .. } => err,
                other => ParamError::Validation {
                    name: self.name.clone(),
                    message: other.to_string(),
                },
            }),
            None => Ok(()),
        }
    }
}

fn default_label(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("facets", &self.facets)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}
