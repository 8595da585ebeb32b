use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;
use crate::fixture::registry::FixtureRegistry;
use crate::fixture::space::FixtureSpace;
use crate::runtime::Runtime;

/// Shared handle to a test definition.
pub type DefRef = Arc<dyn TestDef>;

/// The capability contract a test class exposes to the core.
///
/// Definitions are registered as `Arc<dyn TestDef>` and identified by
/// [`qualname`](TestDef::qualname). The core only reads the declared
/// defaults; all per-construction state travels in a [`BuildContext`],
/// so building two instances of the same definition never races.
pub trait TestDef: Send + Sync {
    /// Qualified name identifying this definition.
    fn qualname(&self) -> &str;

    /// Number of points in this definition's parameter space. Contract:
    /// own parameter combinations times `fixture_space().len()`, always
    /// at least 1.
    fn num_variants(&self) -> usize {
        self.fixture_space().len()
    }

    /// An abstract definition has undefined parameters and can never be
    /// instantiated.
    fn is_abstract(&self) -> bool {
        false
    }

    /// Run-only definitions skip the compilation stage. Session- and
    /// partition-scoped fixtures must be run-only.
    fn run_only(&self) -> bool {
        false
    }

    /// Unique name of one variant of this definition.
    fn full_name(&self, variant: Option<usize>) -> String {
        match variant {
            Some(v) if self.num_variants() > 1 => format!("{}_{v}", self.qualname()),
            _ => self.qualname().to_owned(),
        }
    }

    /// Declared valid systems; `None` means undefined.
    fn valid_systems(&self) -> Option<Vec<String>> {
        None
    }

    /// Declared valid programming environments; `None` means undefined.
    fn valid_prog_environs(&self) -> Option<Vec<String>> {
        None
    }

    /// Framework-version compatibility expressions gating registration.
    /// Empty means compatible with every version.
    fn required_version(&self) -> Vec<String> {
        Vec::new()
    }

    /// The fixture declarations visible to this definition.
    fn fixture_space(&self) -> &FixtureSpace;

    /// Constructor body. Runs after the case shell is built and before
    /// fixtures are injected. May fail with [`CoreError::Skip`] to request
    /// a non-fatal skip, or any other error to drop this one instance.
    fn init(&self, case: &mut TestCase) -> Result<(), CoreError> {
        let _ = case;
        Ok(())
    }
}

/// Granularity at which a dependency edge binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// One shared target instance for the whole session.
    Fully,
    /// One target instance per partition.
    ByPartition,
    /// One target instance per partition and environment.
    ByEnvironment,
    /// Exact-case binding; the target is never shared.
    ByCase,
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fully => write!(f, "fully"),
            Self::ByPartition => write!(f, "by-partition"),
            Self::ByEnvironment => write!(f, "by-environment"),
            Self::ByCase => write!(f, "by-case"),
        }
    }
}

/// Which declared defaults win over context overrides after construction.
///
/// Bit 0 resets `valid_systems`, bit 1 resets `valid_prog_environs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSysEnv {
    pub systems: bool,
    pub environs: bool,
}

impl ResetSysEnv {
    pub const NONE: Self = Self {
        systems: false,
        environs: false,
    };

    pub fn from_bits(bits: u8) -> Self {
        Self {
            systems: bits & 1 != 0,
            environs: bits & 2 != 0,
        }
    }
}

/// Explicit per-construction configuration.
///
/// This replaces the technique of temporarily overwriting class-level
/// defaults: the fixture registry passes the scoped name, systems and
/// environments here instead, and the definition itself stays untouched.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Override for the instance name; defaults to `full_name(variant)`.
    pub name: Option<String>,
    /// Override for the declared valid systems.
    pub valid_systems: Option<Vec<String>>,
    /// Override for the declared valid programming environments.
    pub valid_prog_environs: Option<Vec<String>>,
    /// Variant to instantiate.
    pub variant: Option<usize>,
    pub reset: ResetSysEnv,
    /// Qualnames of the definitions on the dependency branch leading to
    /// this construction, root first. Drives the fixture cycle guard.
    pub ancestry: Vec<String>,
}

impl BuildContext {
    /// Context for a leaf test variant.
    pub fn for_variant(variant: usize, reset: ResetSysEnv) -> Self {
        Self {
            variant: Some(variant),
            reset,
            ..Self::default()
        }
    }
}

/// Resolves a dependency target at hook-execution time.
pub trait DepResolver {
    /// Look up the instance of the dependency `name` built for the given
    /// programming environment.
    fn get_dependency(&self, name: &str, environ: &str) -> Option<&TestCase>;
}

/// A resolver with no dependencies; every lookup misses.
pub struct NoDependencies;

impl DepResolver for NoDependencies {
    fn get_dependency(&self, _name: &str, _environ: &str) -> Option<&TestCase> {
        None
    }
}

/// A concrete, runnable test instance produced by the core.
pub struct TestCase {
    def: DefRef,
    pub name: String,
    pub variant: Option<usize>,
    pub valid_systems: Option<Vec<String>>,
    pub valid_prog_environs: Option<Vec<String>>,
    /// Ordered user state; the constructor body and hooks read and write
    /// key-value pairs here.
    pub data: Vec<(String, String)>,
    /// Hook names that must not fire for this instance.
    pub disabled_hooks: HashSet<String>,
    deps: Vec<(String, DepKind)>,
    fixture_registry: Option<FixtureRegistry>,
    ancestry: Vec<String>,
}

impl TestCase {
    /// Build the case shell from a definition and its construction context.
    pub fn new(def: DefRef, ctx: &BuildContext) -> Self {
        let name = ctx
            .name
            .clone()
            .unwrap_or_else(|| def.full_name(ctx.variant));
        let valid_systems = if ctx.reset.systems {
            def.valid_systems()
        } else {
            ctx.valid_systems.clone().or_else(|| def.valid_systems())
        };
        let valid_prog_environs = if ctx.reset.environs {
            def.valid_prog_environs()
        } else {
            ctx.valid_prog_environs
                .clone()
                .or_else(|| def.valid_prog_environs())
        };

        Self {
            def,
            name,
            variant: ctx.variant,
            valid_systems,
            valid_prog_environs,
            data: Vec::new(),
            disabled_hooks: HashSet::new(),
            deps: Vec::new(),
            fixture_registry: None,
            ancestry: ctx.ancestry.clone(),
        }
    }

    pub fn def(&self) -> &DefRef {
        &self.def
    }

    pub fn qualname(&self) -> &str {
        self.def.qualname()
    }

    /// Add a dependency edge from this case to the named target.
    pub fn depends_on(&mut self, target: &str, kind: DepKind) {
        self.deps.push((target.to_owned(), kind));
    }

    pub fn deps(&self) -> &[(String, DepKind)] {
        &self.deps
    }

    /// Definitions on the branch leading to this case, root first.
    pub fn ancestry(&self) -> &[String] {
        &self.ancestry
    }

    pub fn disable_hook(&mut self, name: &str) {
        self.disabled_hooks.insert(name.to_owned());
    }

    pub fn fixture_registry(&self) -> Option<&FixtureRegistry> {
        self.fixture_registry.as_ref()
    }

    pub(crate) fn set_fixture_registry(&mut self, reg: FixtureRegistry) {
        self.fixture_registry = Some(reg);
    }

    /// Consume this case's private fixture registry. The expansion driver
    /// calls this once per case; the registry is not needed afterwards.
    pub fn take_fixture_registry(&mut self) -> Option<FixtureRegistry> {
        self.fixture_registry.take()
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("qualname", &self.def.qualname())
            .field("variant", &self.variant)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// Construct one instance of a definition.
///
/// Runs the definition's constructor body, then injects its fixture
/// dependencies. A definition with an empty fixture space allocates no
/// fixture registry at all.
///
/// # Errors
///
/// Returns [`CoreError::Registration`] for an abstract definition,
/// whatever the constructor body raised, or a
/// [`CoreError::Configuration`] from fixture injection.
pub fn instantiate(def: &DefRef, ctx: &BuildContext, rt: &Runtime) -> Result<TestCase, CoreError> {
    if def.is_abstract() {
        return Err(CoreError::Registration(format!(
            "cannot instantiate abstract test {:?}",
            def.qualname()
        )));
    }

    let mut case = TestCase::new(Arc::clone(def), ctx);
    def.init(&mut case)?;

    let space = def.fixture_space();
    if !space.is_empty() {
        let index = case.variant.unwrap_or(0) % space.len();
        space.inject(&mut case, rt, index)?;
    }

    Ok(case)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::System;

    struct PlainDef {
        qualname: String,
        variants: usize,
        abstract_: bool,
        systems: Option<Vec<String>>,
        space: FixtureSpace,
    }

    impl PlainDef {
        fn new(qualname: &str, variants: usize) -> Self {
            Self {
                qualname: qualname.into(),
                variants,
                abstract_: false,
                systems: Some(vec!["*".into()]),
                space: FixtureSpace::default(),
            }
        }
    }

    impl TestDef for PlainDef {
        fn qualname(&self) -> &str {
            &self.qualname
        }

        fn num_variants(&self) -> usize {
            self.variants
        }

        fn is_abstract(&self) -> bool {
            self.abstract_
        }

        fn valid_systems(&self) -> Option<Vec<String>> {
            self.systems.clone()
        }

        fn valid_prog_environs(&self) -> Option<Vec<String>> {
            Some(vec!["*".into()])
        }

        fn fixture_space(&self) -> &FixtureSpace {
            &self.space
        }
    }

    fn runtime() -> Runtime {
        Runtime::new(System {
            name: "testsys".into(),
            partitions: vec![],
        })
    }

    #[test]
    fn single_variant_full_name_is_qualname() {
        let def = PlainDef::new("HelloTest", 1);
        assert_eq!(def.full_name(Some(0)), "HelloTest");
        assert_eq!(def.full_name(None), "HelloTest");
    }

    #[test]
    fn multi_variant_full_name_carries_variant() {
        let def = PlainDef::new("SweepTest", 4);
        assert_eq!(def.full_name(Some(2)), "SweepTest_2");
    }

    #[test]
    fn context_overrides_win_over_declared_defaults() {
        let def: DefRef = Arc::new(PlainDef::new("T", 1));
        let ctx = BuildContext {
            name: Some("T_scoped".into()),
            valid_systems: Some(vec!["sys:p0".into()]),
            ..BuildContext::default()
        };
        let case = TestCase::new(def, &ctx);
        assert_eq!(case.name, "T_scoped");
        assert_eq!(case.valid_systems, Some(vec!["sys:p0".into()]));
    }

    #[test]
    fn reset_flags_restore_declared_defaults() {
        let def: DefRef = Arc::new(PlainDef::new("T", 1));
        let ctx = BuildContext {
            valid_systems: Some(vec!["sys:p0".into()]),
            reset: ResetSysEnv::from_bits(1),
            ..BuildContext::default()
        };
        let case = TestCase::new(def, &ctx);
        assert_eq!(case.valid_systems, Some(vec!["*".into()]));
    }

    #[test]
    fn reset_bits_decode() {
        assert_eq!(ResetSysEnv::from_bits(0), ResetSysEnv::NONE);
        assert!(ResetSysEnv::from_bits(1).systems);
        assert!(!ResetSysEnv::from_bits(1).environs);
        assert!(ResetSysEnv::from_bits(3).systems);
        assert!(ResetSysEnv::from_bits(3).environs);
    }

    #[test]
    fn instantiate_rejects_abstract_definition() {
        let mut def = PlainDef::new("AbstractBase", 1);
        def.abstract_ = true;
        let def: DefRef = Arc::new(def);
        let err = instantiate(&def, &BuildContext::default(), &runtime()).unwrap_err();
        assert!(matches!(err, CoreError::Registration(_)));
    }

    #[test]
    fn empty_fixture_space_allocates_no_registry() {
        let def: DefRef = Arc::new(PlainDef::new("NoFixtures", 1));
        let case = instantiate(&def, &BuildContext::default(), &runtime()).unwrap();
        assert!(case.fixture_registry().is_none());
    }

    #[test]
    fn constructor_skip_propagates() {
        struct Skipper(FixtureSpace);
        impl TestDef for Skipper {
            fn qualname(&self) -> &str {
                "Skipper"
            }
            fn fixture_space(&self) -> &FixtureSpace {
                &self.0
            }
            fn init(&self, _case: &mut TestCase) -> Result<(), CoreError> {
                Err(CoreError::Skip("unsupported device".into()))
            }
        }
        let def: DefRef = Arc::new(Skipper(FixtureSpace::default()));
        let err = instantiate(&def, &BuildContext::default(), &runtime()).unwrap_err();
        assert!(err.is_expected());
    }

    #[test]
    fn constructor_body_can_record_state() {
        struct Stateful(FixtureSpace);
        impl TestDef for Stateful {
            fn qualname(&self) -> &str {
                "Stateful"
            }
            fn fixture_space(&self) -> &FixtureSpace {
                &self.0
            }
            fn init(&self, case: &mut TestCase) -> Result<(), CoreError> {
                case.data.push(("executable".into(), "./hello".into()));
                case.disable_hook("set_memory_limit");
                Ok(())
            }
        }
        let def: DefRef = Arc::new(Stateful(FixtureSpace::default()));
        let case = instantiate(&def, &BuildContext::default(), &runtime()).unwrap();
        assert_eq!(case.data, vec![("executable".into(), "./hello".into())]);
        assert!(case.disabled_hooks.contains("set_memory_limit"));
    }

    #[test]
    fn no_dependencies_resolver_always_misses() {
        assert!(NoDependencies.get_dependency("any", "gnu").is_none());
    }
}
