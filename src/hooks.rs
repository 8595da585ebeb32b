use std::fmt;
use std::sync::Arc;

use crate::case::{DepResolver, TestCase};
use crate::error::CoreError;

/// A pipeline stage hooks can attach around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Constructor-adjacent marker; only post-hooks are legal here.
    Init,
    Setup,
    Compile,
    Run,
    Sanity,
    Performance,
    Cleanup,
}

impl Stage {
    /// Name of the pipeline function this stage maps to. The compile and
    /// run stages attach around the corresponding wait functions.
    pub fn pipeline_name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Setup => "setup",
            Self::Compile => "compile_wait",
            Self::Run => "run_wait",
            Self::Sanity => "sanity",
            Self::Performance => "performance",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pipeline_name())
    }
}

/// Whether a hook runs before or after its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Pre,
    Post,
}

/// A (pre|post, stage) attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachPoint {
    pub when: When,
    pub stage: Stage,
}

impl AttachPoint {
    /// Attach before a stage.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Registration`] for `Stage::Init`: no hook may
    /// run before construction.
    pub fn pre(stage: Stage) -> Result<Self, CoreError> {
        if stage == Stage::Init {
            return Err(CoreError::Registration(
                "pre-init hooks are not allowed".into(),
            ));
        }
        Ok(Self {
            when: When::Pre,
            stage,
        })
    }

    /// Attach after a stage.
    pub fn post(stage: Stage) -> Self {
        Self {
            when: When::Post,
            stage,
        }
    }
}

impl fmt::Display for AttachPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.when {
            When::Pre => write!(f, "pre_{}", self.stage),
            When::Post => write!(f, "post_{}", self.stage),
        }
    }
}

/// The callable behind a hook. Dependency-resolving hooks additionally
/// receive the dependency-resolution collaborator.
#[derive(Clone)]
pub enum HookFn {
    Plain(Arc<dyn Fn(&mut TestCase) -> Result<(), CoreError> + Send + Sync>),
    WithDeps(Arc<dyn Fn(&mut TestCase, &dyn DepResolver) -> Result<(), CoreError> + Send + Sync>),
}

/// A declared hook method: name, attachment points and the callable.
#[derive(Clone)]
pub struct HookDecl {
    name: String,
    attach: Vec<AttachPoint>,
    resolves_deps: bool,
    func: HookFn,
}

impl HookDecl {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut TestCase) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            attach: Vec::new(),
            resolves_deps: false,
            func: HookFn::Plain(Arc::new(func)),
        }
    }

    /// Declare a dependency-resolving hook. Unless also attached to an
    /// explicit point, it is scheduled into post-setup ahead of every
    /// other post-setup hook.
    pub fn resolving_deps<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut TestCase, &dyn DepResolver) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            attach: Vec::new(),
            resolves_deps: true,
            func: HookFn::WithDeps(Arc::new(func)),
        }
    }

    /// Attach at an additional point. Declarations can stack attachments,
    /// in which case the hook fires at every one of them.
    pub fn at(mut self, point: AttachPoint) -> Self {
        self.attach.push(point);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A scheduled hook. Equality and hashing are by name only, so a
/// same-named hook counts as already present in a phase's ordered set;
/// that is the override mechanism across inheritance.
#[derive(Clone)]
pub struct Hook {
    name: String,
    func: HookFn,
}

impl Hook {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the hook on a case.
    ///
    /// # Errors
    ///
    /// Propagates whatever the hook body raises.
    pub fn call(&self, case: &mut TestCase, resolver: &dyn DepResolver) -> Result<(), CoreError> {
        match &self.func {
            HookFn::Plain(f) => f(case),
            HookFn::WithDeps(f) => f(case, resolver),
        }
    }
}

impl PartialEq for Hook {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Hook {}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

/// Per-class registry of hooks, bucketed by attachment point.
///
/// Buckets are insertion-ordered sets with [`Hook`]'s name-based
/// equality: inserting a hook whose name is already present is a no-op.
/// To make a subclass's hook override a base's same-named one, merge the
/// subclass registry first and [`update`](HookRegistry::update) with the
/// base afterwards; the base's insertion is then rejected.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    phases: Vec<(AttachPoint, Vec<Hook>)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a class's own hook declarations.
    ///
    /// Dependency-resolving hooks without an explicit attachment are
    /// prepended to the post-setup bucket, ahead of any hook that was
    /// attached there explicitly.
    pub fn create(decls: &[HookDecl]) -> Self {
        let mut reg = Self::new();
        let mut dep_hooks = Vec::new();

        for decl in decls {
            let hook = Hook {
                name: decl.name.clone(),
                func: decl.func.clone(),
            };
            if decl.resolves_deps && decl.attach.is_empty() {
                dep_hooks.push(hook.clone());
                continue;
            }
            for point in &decl.attach {
                reg.insert(*point, hook.clone());
            }
        }

        if !dep_hooks.is_empty() {
            let post_setup = AttachPoint::post(Stage::Setup);
            dep_hooks.extend(reg.bucket_mut(post_setup).drain(..));
            for hook in dep_hooks {
                reg.insert(post_setup, hook);
            }
        }

        reg
    }

    /// Hooks registered at an attachment point, in registry order.
    pub fn hooks(&self, point: AttachPoint) -> &[Hook] {
        self.phases
            .iter()
            .find(|(p, _)| *p == point)
            .map(|(_, hooks)| hooks.as_slice())
            .unwrap_or(&[])
    }

    /// Merge another registry into this one, phase by phase, with
    /// insert-if-absent-by-name semantics. Merge subclass registries
    /// before base registries.
    pub fn update(&mut self, other: &HookRegistry) {
        for (point, hooks) in &other.phases {
            for hook in hooks {
                self.insert(*point, hook.clone());
            }
        }
    }

    fn insert(&mut self, point: AttachPoint, hook: Hook) {
        let bucket = self.bucket_mut(point);
        if !bucket.contains(&hook) {
            bucket.push(hook);
        }
    }

    fn bucket_mut(&mut self, point: AttachPoint) -> &mut Vec<Hook> {
        if !self.phases.iter().any(|(p, _)| *p == point) {
            self.phases.push((point, Vec::new()));
        }
        self.phases
            .iter_mut()
            .find(|(p, _)| *p == point)
            .map(|(_, hooks)| hooks)
            .expect("bucket just ensured")
    }
}

/// Run a pipeline stage with its pre- and post-hooks attached.
///
/// Pre-hooks fire in registry order, then the stage body, then the
/// post-hooks, skipping any hook whose name is in the case's disabled
/// set at both attachment points.
///
/// # Errors
///
/// Propagates the first error from a hook or the stage body.
pub fn run_stage<F>(
    case: &mut TestCase,
    hooks: &HookRegistry,
    stage: Stage,
    resolver: &dyn DepResolver,
    body: F,
) -> Result<(), CoreError>
where
    F: FnOnce(&mut TestCase) -> Result<(), CoreError>,
{
    let fire = |case: &mut TestCase, point: AttachPoint| -> Result<(), CoreError> {
        // The bucket is cloned so hooks may mutate the case freely.
        let selected: Vec<Hook> = hooks
            .hooks(point)
            .iter()
            .filter(|h| !case.disabled_hooks.contains(h.name()))
            .cloned()
            .collect();
        for hook in selected {
            hook.call(case, resolver)?;
        }
        Ok(())
    };

    if stage != Stage::Init {
        fire(
            case,
            AttachPoint {
                when: When::Pre,
                stage,
            },
        )?;
    }
    body(case)?;
    fire(case, AttachPoint::post(stage))
}
