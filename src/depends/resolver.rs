//! Resolution of dependency declarations into concrete parameters.
//!
//! A declaration is resolved in two stages. When a class is built, string
//! specs are resolved against the class: local parameters become [`PInfo`]s,
//! local methods become [`MInfo`]s whose own dependencies are expanded, and
//! specs through sub-objects are kept as [`DInfo`]s because the sub-objects
//! only exist on instances. When an instance is created (and whenever one
//! of its sub-objects is replaced) the [`DInfo`]s are resolved against the
//! live object graph.
//!
//! Resolving a path `a.b.c` also yields dependencies on `a` and on `b` of
//! the object in `a` ("intermediate" dependencies), so that swapping either
//! sub-object re-resolves the chain.

use std::fmt;

use crate::error::{ParamError, Result};
use crate::function::{Function, Kwargs};
use crate::parameterized::{Class, Owner, ParamRef, Parameterized};
use crate::value::Value;

use super::spec::DependencySpec;
use super::Dependency;

/// A resolved dependency on one attribute of one parameter.
#[derive(Clone)]
pub struct PInfo {
    /// The instance owning the parameter, `None` for class-level dependencies.
    pub inst: Option<Parameterized>,
    pub cls: Class,
    pub name: String,
    /// `"value"` or the name of a facet.
    pub what: String,
}

impl PInfo {
    /// The owner whose watchers observe this dependency.
    pub fn owner(&self) -> Owner {
        match &self.inst {
            Some(inst) => Owner::Instance(inst.clone()),
            None => Owner::Class(self.cls.clone()),
        }
    }

    pub fn param_ref(&self) -> ParamRef {
        ParamRef::new(self.owner(), self.name.clone())
    }
}

impl PartialEq for PInfo {
    fn eq(&self, other: &Self) -> bool {
        self.owner().ptr_eq(&other.owner()) && self.name == other.name && self.what == other.what
    }
}

impl fmt::Debug for PInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PInfo({}.{}:{})", self.owner().name(), self.name, self.what)
    }
}

/// A dependency on a method, expanded into that method's own dependencies.
#[derive(Clone, Debug)]
pub struct MInfo {
    pub inst: Option<Parameterized>,
    pub cls: Class,
    pub name: String,
}

impl MInfo {
    fn owner(&self) -> Owner {
        match &self.inst {
            Some(inst) => Owner::Instance(inst.clone()),
            None => Owner::Class(self.cls.clone()),
        }
    }
}

/// A dependency through sub-objects, resolved once an instance exists.
#[derive(Clone, Debug, PartialEq)]
pub struct DInfo {
    pub spec: DependencySpec,
}

impl DInfo {
    /// Attribute of the declaring object at the start of the path.
    pub fn root(&self) -> &str {
        self.spec.root()
    }
}

/// Whether dependencies on the path to a sub-object are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intermediate {
    No,
    Yes,
    /// Report only the path dependencies.
    Only,
}

/// Outcome of resolving one spec segment.
#[derive(Clone, Debug)]
pub(crate) enum Resolved {
    Param(PInfo),
    Method(MInfo),
}

type SpecResult = (Vec<Resolved>, Vec<DInfo>);

fn missing(attr: &str, owner: &str) -> ParamError {
    ParamError::AttributeNotResolved {
        attr: attr.to_string(),
        owner: owner.to_string(),
    }
}

/// Value at `path` on `owner`, with `None` standing for a missing sub-object.
fn lookup_path(owner: &Owner, path: &[String]) -> Option<Value> {
    if path.is_empty() {
        return None;
    }
    match owner.to_value().get_path(&path.join(".")) {
        Some(Value::None) | Some(Value::Undefined) | None => None,
        Some(value) => Some(value),
    }
}

fn has_attribute(owner: &Owner, name: &str) -> bool {
    match owner {
        Owner::Instance(obj) => obj.get_attr(name).is_ok(),
        Owner::Class(cls) => cls.has_param(name) || cls.has_method(name),
    }
}

/// Resolve one dependency declared on `owner`.
pub(crate) fn spec_to_obj(
    owner: &Owner,
    dep: &Dependency,
    dynamic: bool,
    intermediate: Intermediate,
) -> Result<SpecResult> {
    let spec = match dep {
        Dependency::Param(p) => {
            let info = PInfo {
                inst: p.owner().instance(),
                cls: p.owner().class(),
                name: p.name().to_string(),
                what: "value".to_string(),
            };
            let deps = if intermediate == Intermediate::Only {
                Vec::new()
            } else {
                vec![Resolved::Param(info)]
            };
            return Ok((deps, Vec::new()));
        }
        Dependency::Function(f) => {
            let deps = resolve_ref(&Value::Function(f.clone()), false)?
                .into_iter()
                .map(|p| {
                    Resolved::Param(PInfo {
                        inst: p.owner().instance(),
                        cls: p.owner().class(),
                        name: p.name().to_string(),
                        what: "value".to_string(),
                    })
                })
                .collect();
            return Ok((deps, Vec::new()));
        }
        Dependency::Spec(spec) => DependencySpec::parse(spec)?,
    };
    resolve_spec(owner, &spec, dynamic, intermediate)
}

fn resolve_spec(
    owner: &Owner,
    spec: &DependencySpec,
    dynamic: bool,
    intermediate: Intermediate,
) -> Result<SpecResult> {
    let src = if !spec.is_nested() {
        owner.to_value()
    } else if !dynamic {
        return Ok((Vec::new(), vec![DInfo { spec: spec.clone() }]));
    } else {
        let root = spec.root();
        if !has_attribute(owner, root) {
            return Err(missing(root, &owner.name()));
        }
        match lookup_path(owner, spec.path()) {
            Some(src) => src,
            None => return partially_resolve(owner, spec, dynamic, intermediate),
        }
    };

    let src_owner = match &src {
        Value::Object(obj) => Owner::Instance(obj.clone()),
        Value::Class(cls) => Owner::Class(cls.clone()),
        other => return Err(missing(spec.name(), &other.repr())),
    };
    let (inst, cls) = (src_owner.instance(), src_owner.class());

    let info = if spec.name() == "param" {
        let (mut deps, mut dynamic_deps) = if spec.is_nested() {
            resolve_spec(owner, &DependencySpec::parse(&spec.path_string())?, dynamic, intermediate)?
        } else {
            (Vec::new(), Vec::new())
        };
        for name in cls.param_names() {
            let (param_deps, param_dynamic) =
                spec_to_obj(&src_owner, &Dependency::Spec(name), dynamic, intermediate)?;
            deps.extend(param_deps);
            dynamic_deps.extend(param_dynamic);
        }
        return Ok((deps, dynamic_deps));
    } else if cls.has_param(spec.name()) {
        Resolved::Param(PInfo {
            inst,
            cls,
            name: spec.name().to_string(),
            what: spec.what().to_string(),
        })
    } else if cls.has_method(spec.name()) {
        Resolved::Method(MInfo {
            inst,
            cls,
            name: spec.name().to_string(),
        })
    } else {
        match &src_owner {
            Owner::Instance(obj) => match obj.attr(spec.name()) {
                Some(Value::Object(_)) => return Ok((Vec::new(), Vec::new())),
                _ => return Err(missing(spec.name(), obj.name())),
            },
            Owner::Class(cls) => return Err(missing(spec.name(), cls.name())),
        }
    };

    if !spec.is_nested() || intermediate == Intermediate::No {
        return Ok((vec![info], Vec::new()));
    }
    let parent = DependencySpec::parse(&spec.path_string())?;
    let (mut deps, dynamic_deps) = resolve_spec(owner, &parent, dynamic, intermediate)?;
    if intermediate != Intermediate::Only {
        deps.push(info);
    }
    Ok((deps, dynamic_deps))
}

/// A path whose end is not available yet: watch the deepest available hop
/// so that the dependency can be completed once the missing object appears.
fn partially_resolve(
    owner: &Owner,
    spec: &DependencySpec,
    dynamic: bool,
    intermediate: Intermediate,
) -> Result<SpecResult> {
    let path = spec.path();
    let mut deps = Vec::new();
    if intermediate != Intermediate::No {
        let mut available = path.len();
        while available > 0 {
            available -= 1;
            if lookup_path(owner, &path[..available]).is_some() {
                break;
            }
        }
        if available > 0 {
            let partial = DependencySpec::parse(&path[..=available].join("."))?;
            let (subdeps, _) = resolve_spec(owner, &partial, dynamic, intermediate)?;
            deps.extend(subdeps);
        }
    }
    let dynamic_deps = if intermediate == Intermediate::Only {
        Vec::new()
    } else {
        vec![DInfo { spec: spec.clone() }]
    };
    Ok((deps, dynamic_deps))
}

/// Parameters a method depends on, expanding method dependencies recursively.
///
/// A method without dependency metadata depends on every parameter of its class.
pub(crate) fn params_depended_on(
    minfo: &MInfo,
    dynamic: bool,
    intermediate: Intermediate,
) -> Result<(Vec<PInfo>, Vec<DInfo>)> {
    let owner = minfo.owner();
    let method = minfo
        .cls
        .method_def(&minfo.name)
        .ok_or_else(|| ParamError::MethodNotFound {
            name: minfo.name.clone(),
            class: minfo.cls.name().to_string(),
        })?;
    let declared: Vec<Dependency> = match &method.dinfo {
        Some(dinfo) => dinfo
            .dependencies
            .iter()
            .chain(dinfo.kw.values())
            .cloned()
            .collect(),
        None => minfo
            .cls
            .param_names()
            .into_iter()
            .map(Dependency::Spec)
            .collect(),
    };

    let (mut deps, mut dynamic_deps) = (Vec::new(), Vec::new());
    for dep in &declared {
        let (resolved, unresolved) = spec_to_obj(&owner, dep, dynamic, intermediate)?;
        dynamic_deps.extend(unresolved);
        for item in resolved {
            match item {
                Resolved::Param(info) => deps.push(info),
                Resolved::Method(m) => {
                    let (method_deps, method_dynamic) =
                        params_depended_on(&m, dynamic, intermediate)?;
                    deps.extend(method_deps);
                    dynamic_deps.extend(method_dynamic);
                }
            }
        }
    }
    Ok((deps, dynamic_deps))
}

/// Bind class-level dependencies to `obj` and resolve sub-object dependencies.
pub(crate) fn resolve_mcs_deps(
    obj: &Parameterized,
    resolved: &[PInfo],
    dynamic: &[DInfo],
    intermediate: Intermediate,
) -> Result<Vec<PInfo>> {
    let mut dependencies = Vec::new();
    for dep in resolved {
        if !obj.class().is_subclass_of(&dep.cls) || dep.inst.is_some() {
            dependencies.push(dep.clone());
            continue;
        }
        dependencies.push(PInfo {
            inst: Some(obj.clone()),
            ..dep.clone()
        });
    }
    let owner = Owner::Instance(obj.clone());
    for ddep in dynamic {
        let (subresolved, _) = resolve_spec(&owner, &ddep.spec, true, intermediate)?;
        for sub in subresolved {
            match sub {
                Resolved::Param(info) => dependencies.push(info),
                Resolved::Method(m) => {
                    dependencies.extend(params_depended_on(&m, true, intermediate)?.0);
                }
            }
        }
    }
    Ok(dependencies)
}

/// Every parameter a reference depends on.
///
/// Containers are searched only when `recursive` is set.
pub(crate) fn resolve_ref(value: &Value, recursive: bool) -> Result<Vec<ParamRef>> {
    match value {
        Value::List(items) | Value::Tuple(items) if recursive => {
            let mut refs = Vec::new();
            for item in items {
                refs.extend(resolve_ref(item, recursive)?);
            }
            Ok(refs)
        }
        Value::Map(map) if recursive => {
            let mut refs = Vec::new();
            for item in map.values() {
                refs.extend(resolve_ref(item, recursive)?);
            }
            Ok(refs)
        }
        Value::Slice(slice) if recursive => {
            let mut refs = Vec::new();
            for item in [&slice.start, &slice.stop, &slice.step] {
                refs.extend(resolve_ref(item, recursive)?);
            }
            Ok(refs)
        }
        Value::Param(p) => Ok(vec![p.clone()]),
        Value::Rx(rx) => Ok(rx.params()),
        Value::Function(f) if f.dependencies().is_some() => function_refs(f),
        _ => Ok(Vec::new()),
    }
}

fn function_refs(f: &Function) -> Result<Vec<ParamRef>> {
    let Some(dinfo) = f.dependencies() else {
        return Ok(Vec::new());
    };
    let mut refs = Vec::new();
    for dep in dinfo.dependencies.iter().chain(dinfo.kw.values()) {
        match dep {
            Dependency::Param(p) => refs.push(p.clone()),
            Dependency::Function(g) => refs.extend(function_refs(g)?),
            Dependency::Spec(spec) => {
                let owner = f.owner().ok_or_else(|| ParamError::StringSpecOnFunction {
                    function: f.name().to_string(),
                })?;
                refs.extend(spec_refs(owner, spec)?);
            }
        }
    }
    Ok(refs)
}

fn spec_refs(owner: &Parameterized, spec: &str) -> Result<Vec<ParamRef>> {
    if owner.class().has_param(spec) {
        return Ok(vec![owner.param().get(spec)?]);
    }
    let parts: Vec<&str> = spec.split('.').collect();
    if let Some((last, path)) = parts.split_last().filter(|(_, path)| !path.is_empty()) {
        let mut current = Value::Object(owner.clone());
        for attr in path {
            current = current.get_attr(attr)?;
        }
        return match current {
            Value::Object(obj) => Ok(vec![obj.param().get(last)?]),
            Value::Class(cls) => Ok(vec![cls.param().get(last)?]),
            other => Err(missing(last, &other.repr())),
        };
    }
    resolve_ref(&owner.get_attr(spec)?, false)
}

/// Current value of a reference.
pub(crate) fn resolve_value(value: &Value, recursive: bool) -> Result<Value> {
    match value {
        Value::List(items) if recursive => Ok(Value::List(
            items
                .iter()
                .map(|v| resolve_value(v, recursive))
                .collect::<Result<_>>()?,
        )),
        Value::Tuple(items) if recursive => Ok(Value::Tuple(
            items
                .iter()
                .map(|v| resolve_value(v, recursive))
                .collect::<Result<_>>()?,
        )),
        Value::Map(map) if recursive => Ok(Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value(v, recursive)?)))
                .collect::<Result<_>>()?,
        )),
        Value::Slice(slice) if recursive => Ok(Value::from(crate::value::Slice::new(
            resolve_value(&slice.start, recursive)?,
            resolve_value(&slice.stop, recursive)?,
            resolve_value(&slice.step, recursive)?,
        ))),
        Value::Param(p) => p.value(),
        Value::Rx(rx) => rx.value(),
        Value::Function(f) if f.dependencies().is_some() || f.is_deferred() => {
            eval_function_with_deps(f)
        }
        other => Ok(other.clone()),
    }
}

/// Call a dependent function, passing the current values of its parameter
/// dependencies when it was declared to receive them.
pub(crate) fn eval_function_with_deps(f: &Function) -> Result<Value> {
    let mut args = Vec::new();
    let mut kwargs = Kwargs::new();
    if let Some(dinfo) = f.dependencies().filter(|d| d.inject) {
        for dep in &dinfo.dependencies {
            args.push(dependency_value(dep)?);
        }
        for (name, dep) in &dinfo.kw {
            kwargs.insert(name.clone(), dependency_value(dep)?);
        }
    }
    f.call(&args, &kwargs)
}

fn dependency_value(dep: &Dependency) -> Result<Value> {
    match dep {
        Dependency::Param(p) => p.value(),
        Dependency::Function(g) => eval_function_with_deps(g),
        Dependency::Spec(spec) => Err(ParamError::InvalidDependency {
            found: format!("string spec '{}'", spec),
        }),
    }
}
