use crate::case::TestCase;
use crate::error::CoreError;
use crate::fixture::TestFixture;
use crate::fixture::registry::FixtureRegistry;
use crate::runtime::Runtime;

/// The set of fixture declarations visible to one test definition.
///
/// Declarations are kept in declaration order (own and inherited), and the
/// space exposes a combinatorial index over every combination of the
/// targets' variant ids: index `k` decomposes mixed-radix over the
/// declaration order, with the last declared fixture varying fastest.
#[derive(Debug, Clone, Default)]
pub struct FixtureSpace {
    fixtures: Vec<(String, TestFixture)>,
}

impl FixtureSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a base definition's fixture space into this one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Registration`] if a fixture name is already
    /// present, i.e. the same name is declared in more than one base of
    /// `cls`.
    pub fn inherit(&mut self, base: &FixtureSpace, cls: &str) -> Result<(), CoreError> {
        for (name, fixture) in &base.fixtures {
            if self.get(name).is_some() {
                return Err(CoreError::Registration(format!(
                    "fixture space conflict: fixture {name:?} is defined in more than \
                     one base class of {cls:?}"
                )));
            }
            self.fixtures.push((name.clone(), fixture.clone()));
        }
        Ok(())
    }

    /// Declare a fixture in this space.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Registration`] if the name is already
    /// declared; a fixture cannot be re-declared by plain reassignment.
    pub fn declare(&mut self, name: &str, fixture: TestFixture) -> Result<(), CoreError> {
        if self.get(name).is_some() {
            return Err(CoreError::Registration(format!(
                "fixture {name:?} must be modified through the fixture declaration form"
            )));
        }
        self.fixtures.push((name.to_owned(), fixture));
        Ok(())
    }

    /// Look up a declaration by name.
    pub fn get(&self, name: &str) -> Option<&TestFixture> {
        self.fixtures
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    /// Declared fixtures, in declaration order.
    pub fn fixtures(&self) -> impl Iterator<Item = (&str, &TestFixture)> {
        self.fixtures.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// True if no fixtures are declared.
    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    /// Number of variant combinations: the product of every target's
    /// variant count. The empty product is 1.
    pub fn len(&self) -> usize {
        self.fixtures
            .iter()
            .map(|(_, f)| f.target().num_variants())
            .product()
    }

    /// Decompose a combination index into per-fixture variant ids, in
    /// declaration order. Returns `None` when out of range.
    pub fn index(&self, key: usize) -> Option<Vec<(&str, usize)>> {
        if key >= self.len() {
            return None;
        }

        let mut rest = key;
        let mut ids = vec![0usize; self.fixtures.len()];
        for (slot, (_, fixture)) in self.fixtures.iter().enumerate().rev() {
            let radix = fixture.target().num_variants();
            ids[slot] = rest % radix;
            rest /= radix;
        }

        Some(
            self.fixtures
                .iter()
                .zip(ids)
                .map(|((name, _), id)| (name.as_str(), id))
                .collect(),
        )
    }

    /// Iterate every combination of per-fixture variant ids.
    pub fn combinations(&self) -> impl Iterator<Item = Vec<(&str, usize)>> {
        (0..self.len()).map(|k| self.index(k).expect("index within len"))
    }

    /// Inject this space's fixtures as dependencies of a root case.
    ///
    /// Resolves the case's effective partitions and environments against
    /// the runtime, registers every fixture (at the chosen combination
    /// index) into the case's private registry, and adds one dependency
    /// edge per generated name with the scope's binding kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for an out-of-range index,
    /// undefined or empty-resolving `valid_systems`/`valid_prog_environs`,
    /// or a fixture whose target already appears on the case's branch (a
    /// dependency cycle).
    pub fn inject(&self, case: &mut TestCase, rt: &Runtime, index: usize) -> Result<(), CoreError> {
        if self.fixtures.is_empty() {
            return Ok(());
        }

        let combo: Vec<usize> = self
            .index(index)
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "fixture index {index} out of range for {:?}",
                    case.name
                ))
            })?
            .into_iter()
            .map(|(_, id)| id)
            .collect();

        let partitions = resolve_systems(case, rt)?;
        let environs = resolve_environs(case, rt)?;

        let branch = case.name.clone();
        let mut ancestry = case.ancestry().to_vec();
        ancestry.push(case.qualname().to_owned());

        let mut registry = FixtureRegistry::new();
        for ((_, fixture), fid) in self.fixtures.iter().zip(combo) {
            let target = fixture.target().qualname();
            if ancestry.iter().any(|q| q == target) {
                return Err(CoreError::Configuration(format!(
                    "fixture dependency cycle: {:?} requires {target:?}, which is \
                     already on its branch",
                    case.name
                )));
            }

            let dep_names = registry.add(fixture, fid, &branch, &partitions, &environs, &ancestry);
            for dep in dep_names {
                case.depends_on(&dep, fixture.scope().dep_kind());
            }
        }

        case.set_fixture_registry(registry);
        Ok(())
    }
}

/// Effective partitions of a root case: `'*'` or the current system's
/// name expand to every partition of the runtime; anything else is taken
/// verbatim.
fn resolve_systems(case: &TestCase, rt: &Runtime) -> Result<Vec<String>, CoreError> {
    let declared = case.valid_systems.as_ref().ok_or_else(|| {
        CoreError::Configuration(format!("valid_systems is undefined in test {:?}", case.name))
    })?;

    let resolved = if declared.iter().any(|s| s == "*" || s == &rt.system().name) {
        rt.partition_names()
    } else {
        declared.clone()
    };
    if resolved.is_empty() {
        return Err(CoreError::Configuration(format!(
            "no partitions resolved for test {:?}",
            case.name
        )));
    }

    Ok(resolved)
}

/// Effective programming environments: `'*'` expands to the union of
/// environment names across all partitions.
fn resolve_environs(case: &TestCase, rt: &Runtime) -> Result<Vec<String>, CoreError> {
    let declared = case.valid_prog_environs.as_ref().ok_or_else(|| {
        CoreError::Configuration(format!(
            "valid_prog_environs is undefined in test {:?}",
            case.name
        ))
    })?;

    let resolved = if declared.iter().any(|e| e == "*") {
        rt.environ_names()
    } else {
        declared.clone()
    };
    if resolved.is_empty() {
        return Err(CoreError::Configuration(format!(
            "no programming environments resolved for test {:?}",
            case.name
        )));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{BuildContext, DefRef, DepKind, TestDef};
    use crate::fixture::Scope;
    use crate::runtime::{Environment, Partition, System};
    use std::sync::Arc;

    struct Target {
        qualname: &'static str,
        variants: usize,
        space: FixtureSpace,
    }

    impl TestDef for Target {
        fn qualname(&self) -> &str {
            self.qualname
        }
        fn num_variants(&self) -> usize {
            self.variants
        }
        fn run_only(&self) -> bool {
            true
        }
        fn fixture_space(&self) -> &FixtureSpace {
            &self.space
        }
    }

    fn target(qualname: &'static str, variants: usize) -> DefRef {
        Arc::new(Target {
            qualname,
            variants,
            space: FixtureSpace::default(),
        })
    }

    fn fixture(qualname: &'static str, variants: usize, scope: Scope) -> TestFixture {
        TestFixture::new(target(qualname, variants), scope).unwrap()
    }

    fn runtime() -> Runtime {
        Runtime::new(System {
            name: "testsys".into(),
            partitions: vec![
                Partition {
                    fullname: "testsys:cpu".into(),
                    environs: vec![Environment { name: "gnu".into() }],
                },
                Partition {
                    fullname: "testsys:gpu".into(),
                    environs: vec![
                        Environment { name: "gnu".into() },
                        Environment {
                            name: "cray".into(),
                        },
                    ],
                },
            ],
        })
    }

    fn root_case(name: &str) -> TestCase {
        struct Root(FixtureSpace);
        impl TestDef for Root {
            fn qualname(&self) -> &str {
                "RootTest"
            }
            fn valid_systems(&self) -> Option<Vec<String>> {
                Some(vec!["*".into()])
            }
            fn valid_prog_environs(&self) -> Option<Vec<String>> {
                Some(vec!["*".into()])
            }
            fn fixture_space(&self) -> &FixtureSpace {
                &self.0
            }
        }
        let ctx = BuildContext {
            name: Some(name.into()),
            ..BuildContext::default()
        };
        TestCase::new(Arc::new(Root(FixtureSpace::default())), &ctx)
    }

    #[test]
    fn empty_space_has_one_combination() {
        let space = FixtureSpace::new();
        assert!(space.is_empty());
        assert_eq!(space.len(), 1);
        assert_eq!(space.index(0), Some(vec![]));
        assert_eq!(space.index(1), None);
    }

    #[test]
    fn len_is_product_of_target_variants() {
        let mut space = FixtureSpace::new();
        space.declare("a", fixture("A", 2, Scope::Test)).unwrap();
        space.declare("b", fixture("B", 3, Scope::Test)).unwrap();
        assert_eq!(space.len(), 6);
    }

    #[test]
    fn index_decomposes_mixed_radix_last_fastest() {
        let mut space = FixtureSpace::new();
        space.declare("a", fixture("A", 2, Scope::Test)).unwrap();
        space.declare("b", fixture("B", 3, Scope::Test)).unwrap();
        assert_eq!(space.index(0), Some(vec![("a", 0), ("b", 0)]));
        assert_eq!(space.index(1), Some(vec![("a", 0), ("b", 1)]));
        assert_eq!(space.index(3), Some(vec![("a", 1), ("b", 0)]));
        assert_eq!(space.index(5), Some(vec![("a", 1), ("b", 2)]));
        assert_eq!(space.index(6), None);
    }

    #[test]
    fn combinations_cover_the_whole_product() {
        let mut space = FixtureSpace::new();
        space.declare("a", fixture("A", 2, Scope::Test)).unwrap();
        space.declare("b", fixture("B", 2, Scope::Test)).unwrap();
        let combos: Vec<_> = space.combinations().collect();
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0], vec![("a", 0), ("b", 0)]);
        assert_eq!(combos[3], vec![("a", 1), ("b", 1)]);
    }

    #[test]
    fn declare_rejects_duplicate_name() {
        let mut space = FixtureSpace::new();
        space.declare("data", fixture("A", 1, Scope::Test)).unwrap();
        let err = space
            .declare("data", fixture("B", 1, Scope::Test))
            .unwrap_err();
        assert!(err.to_string().contains("data"));
    }

    #[test]
    fn inherit_merges_base_declarations() {
        let mut base = FixtureSpace::new();
        base.declare("data", fixture("A", 2, Scope::Test)).unwrap();
        let mut space = FixtureSpace::new();
        space.declare("build", fixture("B", 1, Scope::Test)).unwrap();
        space.inherit(&base, "Derived").unwrap();
        assert_eq!(space.fixtures().count(), 2);
        assert!(space.get("data").is_some());
    }

    #[test]
    fn inherit_rejects_conflicting_bases() {
        let mut base1 = FixtureSpace::new();
        base1.declare("data", fixture("A", 1, Scope::Test)).unwrap();
        let mut base2 = FixtureSpace::new();
        base2.declare("data", fixture("B", 1, Scope::Test)).unwrap();

        let mut space = FixtureSpace::new();
        space.inherit(&base1, "Derived").unwrap();
        let err = space.inherit(&base2, "Derived").unwrap_err();
        assert!(err.to_string().contains("more than one base"));
    }

    #[test]
    fn inject_records_registry_and_dependency_edges() {
        let mut space = FixtureSpace::new();
        space
            .declare("build", fixture("BuildLib", 1, Scope::Environment))
            .unwrap();
        let mut case = root_case("RootTest");
        space.inject(&mut case, &runtime(), 0).unwrap();

        let reg = case.fixture_registry().expect("registry allocated");
        // One entry per pair of resolved partition and resolved
        // environment; the environment list is the union across
        // partitions, so cpu/cray is included even though the cpu
        // partition does not offer cray.
        assert_eq!(reg.len(), 4);
        assert_eq!(case.deps().len(), 4);
        assert!(
            case.deps()
                .iter()
                .all(|(_, kind)| *kind == DepKind::ByEnvironment)
        );
    }

    #[test]
    fn inject_out_of_range_index_is_a_configuration_error() {
        let mut space = FixtureSpace::new();
        space.declare("a", fixture("A", 2, Scope::Test)).unwrap();
        let mut case = root_case("RootTest");
        let err = space.inject(&mut case, &runtime(), 2).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn inject_requires_defined_systems_and_environs() {
        struct Bare(FixtureSpace);
        impl TestDef for Bare {
            fn qualname(&self) -> &str {
                "Bare"
            }
            fn fixture_space(&self) -> &FixtureSpace {
                &self.0
            }
        }
        let mut space = FixtureSpace::new();
        space.declare("a", fixture("A", 1, Scope::Test)).unwrap();

        let mut case = TestCase::new(
            Arc::new(Bare(FixtureSpace::default())),
            &BuildContext::default(),
        );
        let err = space.inject(&mut case, &runtime(), 0).unwrap_err();
        assert!(err.to_string().contains("valid_systems"));
    }

    #[test]
    fn inject_star_systems_expand_to_all_partitions() {
        let mut space = FixtureSpace::new();
        space
            .declare("data", fixture("FetchData", 1, Scope::Partition))
            .unwrap();
        let mut case = root_case("RootTest");
        space.inject(&mut case, &runtime(), 0).unwrap();

        let reg = case.fixture_registry().unwrap();
        let names: Vec<&str> = reg.names_for("FetchData");
        assert_eq!(names, vec!["FetchData_testsys:cpu", "FetchData_testsys:gpu"]);
    }

    #[test]
    fn inject_rejects_self_referential_fixture() {
        // A definition whose space targets the definition itself.
        struct Selfish {
            space: std::sync::OnceLock<FixtureSpace>,
        }
        impl TestDef for Selfish {
            fn qualname(&self) -> &str {
                "Selfish"
            }
            fn num_variants(&self) -> usize {
                1
            }
            fn run_only(&self) -> bool {
                true
            }
            fn valid_systems(&self) -> Option<Vec<String>> {
                Some(vec!["*".into()])
            }
            fn valid_prog_environs(&self) -> Option<Vec<String>> {
                Some(vec!["*".into()])
            }
            fn fixture_space(&self) -> &FixtureSpace {
                self.space.get().expect("space initialized")
            }
        }

        let def = Arc::new(Selfish {
            space: std::sync::OnceLock::new(),
        });
        let handle: DefRef = def.clone();
        let mut space = FixtureSpace::new();
        space
            .declare("again", TestFixture::new(handle, Scope::Test).unwrap())
            .unwrap();
        def.space.set(space).ok().unwrap();

        let def: DefRef = def;
        let mut case = TestCase::new(Arc::clone(&def), &BuildContext::default());
        case.valid_systems = Some(vec!["*".into()]);
        case.valid_prog_environs = Some(vec!["*".into()]);
        let err = def
            .fixture_space()
            .inject(&mut case, &runtime(), 0)
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
