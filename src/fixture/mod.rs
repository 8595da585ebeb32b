pub mod registry;
pub mod space;

use std::fmt;
use std::str::FromStr;

use crate::case::{DefRef, DepKind};
use crate::error::CoreError;

/// Sharing granularity for a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One instance for the whole session.
    Session,
    /// One instance per partition.
    Partition,
    /// One instance per partition and environment.
    Environment,
    /// One instance per requesting root test; never shared.
    Test,
}

impl Scope {
    /// The dependency-edge granularity this scope binds at.
    pub fn dep_kind(self) -> DepKind {
        match self {
            Self::Session => DepKind::Fully,
            Self::Partition => DepKind::ByPartition,
            Self::Environment => DepKind::ByEnvironment,
            Self::Test => DepKind::ByCase,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Partition => write!(f, "partition"),
            Self::Environment => write!(f, "environment"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "partition" => Ok(Self::Partition),
            "environment" => Ok(Self::Environment),
            "test" => Ok(Self::Test),
            other => Err(CoreError::Registration(format!(
                "invalid fixture scope {other:?}"
            ))),
        }
    }
}

/// A fixture declaration: a target definition plus a sharing scope.
#[derive(Clone)]
pub struct TestFixture {
    target: DefRef,
    scope: Scope,
}

impl TestFixture {
    /// Declare a fixture on a target definition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Registration`] if the scope is `session` or
    /// `partition` and the target is not run-only. Those scopes share one
    /// build across unrelated tests, which only works when there is
    /// nothing to build.
    pub fn new(target: DefRef, scope: Scope) -> Result<Self, CoreError> {
        if matches!(scope, Scope::Session | Scope::Partition) && !target.run_only() {
            return Err(CoreError::Registration(format!(
                "incompatible scope for fixture {:?}: scope {scope} only supports \
                 run-only fixtures",
                target.qualname()
            )));
        }

        Ok(Self { target, scope })
    }

    pub fn target(&self) -> &DefRef {
        &self.target
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Base name of this fixture for one target variant.
    pub fn variant_name(&self, variant: usize) -> String {
        self.target.full_name(Some(variant))
    }
}

impl fmt::Debug for TestFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFixture")
            .field("target", &self.target.qualname())
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::TestDef;
    use crate::fixture::space::FixtureSpace;
    use std::sync::Arc;

    struct Target {
        qualname: &'static str,
        run_only: bool,
        space: FixtureSpace,
    }

    impl TestDef for Target {
        fn qualname(&self) -> &str {
            self.qualname
        }
        fn run_only(&self) -> bool {
            self.run_only
        }
        fn fixture_space(&self) -> &FixtureSpace {
            &self.space
        }
    }

    fn target(qualname: &'static str, run_only: bool) -> DefRef {
        Arc::new(Target {
            qualname,
            run_only,
            space: FixtureSpace::default(),
        })
    }

    #[test]
    fn scope_parses_all_four_names() {
        assert_eq!("session".parse::<Scope>().unwrap(), Scope::Session);
        assert_eq!("partition".parse::<Scope>().unwrap(), Scope::Partition);
        assert_eq!("environment".parse::<Scope>().unwrap(), Scope::Environment);
        assert_eq!("test".parse::<Scope>().unwrap(), Scope::Test);
    }

    #[test]
    fn scope_rejects_unknown_name() {
        let err = "global".parse::<Scope>().unwrap_err();
        assert!(matches!(err, CoreError::Registration(_)));
    }

    #[test]
    fn scope_maps_to_dependency_kind() {
        assert_eq!(Scope::Session.dep_kind(), DepKind::Fully);
        assert_eq!(Scope::Partition.dep_kind(), DepKind::ByPartition);
        assert_eq!(Scope::Environment.dep_kind(), DepKind::ByEnvironment);
        assert_eq!(Scope::Test.dep_kind(), DepKind::ByCase);
    }

    #[test]
    fn session_scope_requires_run_only_target() {
        let err = TestFixture::new(target("BuildGromacs", false), Scope::Session).unwrap_err();
        assert!(err.to_string().contains("run-only"));
        assert!(TestFixture::new(target("FetchData", true), Scope::Session).is_ok());
    }

    #[test]
    fn partition_scope_requires_run_only_target() {
        assert!(TestFixture::new(target("BuildGromacs", false), Scope::Partition).is_err());
        assert!(TestFixture::new(target("FetchData", true), Scope::Partition).is_ok());
    }

    #[test]
    fn environment_and_test_scopes_allow_any_target() {
        assert!(TestFixture::new(target("BuildGromacs", false), Scope::Environment).is_ok());
        assert!(TestFixture::new(target("BuildGromacs", false), Scope::Test).is_ok());
    }
}
