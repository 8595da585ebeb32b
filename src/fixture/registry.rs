use tracing::{debug, warn};

use crate::case::{BuildContext, DefRef, TestCase, instantiate};
use crate::error::CoreError;
use crate::fixture::{Scope, TestFixture};
use crate::runtime::Runtime;

/// One concrete fixture binding: a target definition, the scoped instance
/// name, and the construction arguments stolen from the root test.
#[derive(Clone)]
pub struct FixtureEntry {
    pub def: DefRef,
    pub name: String,
    pub variant: usize,
    pub environs: Vec<String>,
    pub partitions: Vec<String>,
    /// Branch of definitions this entry was discovered under, root first.
    pub ancestry: Vec<String>,
}

impl FixtureEntry {
    fn key(&self) -> (&str, &str) {
        (self.def.qualname(), &self.name)
    }
}

impl std::fmt::Debug for FixtureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureEntry")
            .field("def", &self.def.qualname())
            .field("name", &self.name)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// Registry of concrete fixture bindings, keyed by (definition, scoped
/// name) and kept in insertion order.
///
/// The scoped-naming rule in [`add`](FixtureRegistry::add) is what lets
/// unrelated tests requesting the same fixture at `session`, `partition`
/// or `environment` scope collapse onto one shared instance, while
/// `test`-scoped fixtures stay private to their branch.
#[derive(Debug, Clone, Default)]
pub struct FixtureRegistry {
    entries: Vec<FixtureEntry>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FixtureEntry> {
        self.entries.iter()
    }

    /// Whether any entry targets the given definition.
    pub fn contains_def(&self, qualname: &str) -> bool {
        self.entries.iter().any(|e| e.def.qualname() == qualname)
    }

    /// Scoped names registered for the given definition, insertion order.
    pub fn names_for(&self, qualname: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.def.qualname() == qualname)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Register a fixture, generating its scoped instance names.
    ///
    /// How much of the root test's resolved partitions and environments
    /// each entry keeps depends on the scope:
    /// - `session`: one entry under the bare variant name, first
    ///   environment and first partition only;
    /// - `partition`: one entry per partition (`name_part`), first
    ///   environment only;
    /// - `environment`: one entry per partition and environment
    ///   (`name_part_env`);
    /// - `test`: one entry under `name_branch`, keeping everything; the
    ///   branch makes the name unique to the requesting root.
    ///
    /// Returns the generated names, which the caller turns into
    /// dependency edges.
    pub fn add(
        &mut self,
        fixture: &TestFixture,
        variant: usize,
        branch: &str,
        partitions: &[String],
        environs: &[String],
        ancestry: &[String],
    ) -> Vec<String> {
        let base = fixture.variant_name(variant);
        let mut names = Vec::new();

        let mut push = |name: String, environs: Vec<String>, partitions: Vec<String>| {
            self.upsert(FixtureEntry {
                def: fixture.target().clone(),
                name: name.clone(),
                variant,
                environs,
                partitions,
                ancestry: ancestry.to_vec(),
            });
            names.push(name);
        };

        match fixture.scope() {
            Scope::Session => {
                push(
                    base,
                    vec![environs[0].clone()],
                    vec![partitions[0].clone()],
                );
            }
            Scope::Partition => {
                for part in partitions {
                    push(
                        format!("{base}_{part}"),
                        vec![environs[0].clone()],
                        vec![part.clone()],
                    );
                }
            }
            Scope::Environment => {
                for part in partitions {
                    for env in environs {
                        push(
                            format!("{base}_{part}_{env}"),
                            vec![env.clone()],
                            vec![part.clone()],
                        );
                    }
                }
            }
            Scope::Test => {
                push(
                    format!("{base}_{branch}"),
                    environs.to_vec(),
                    partitions.to_vec(),
                );
            }
        }

        names
    }

    /// Merge another registry into this one; later entries win on a
    /// (definition, name) key collision.
    pub fn update(&mut self, other: FixtureRegistry) {
        for entry in other.entries {
            self.upsert(entry);
        }
    }

    /// Entries of `self` whose (definition, name) key is absent from
    /// `other`.
    pub fn difference(&self, other: &FixtureRegistry) -> FixtureRegistry {
        FixtureRegistry {
            entries: self
                .entries
                .iter()
                .filter(|e| !other.contains_key(e.key()))
                .cloned()
                .collect(),
        }
    }

    /// Construct one case per entry.
    ///
    /// Each entry builds with an explicit [`BuildContext`] carrying the
    /// scoped name and the stolen partitions and environments; the
    /// definition itself is never touched. Expected failures (skip or
    /// construction) are logged and the entry is dropped; configuration
    /// errors propagate.
    ///
    /// # Errors
    ///
    /// Returns the first non-expected error raised by a construction.
    pub fn instantiate_all(&self, rt: &Runtime) -> Result<Vec<TestCase>, CoreError> {
        let mut cases = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let ctx = BuildContext {
                name: Some(entry.name.clone()),
                valid_systems: Some(entry.partitions.clone()),
                valid_prog_environs: Some(entry.environs.clone()),
                variant: Some(entry.variant),
                ancestry: entry.ancestry.clone(),
                ..BuildContext::default()
            };
            match instantiate(&entry.def, &ctx, rt) {
                Ok(case) => cases.push(case),
                Err(e) if e.is_expected() => {
                    warn!(fixture = %entry.name, "skipping fixture: {e}");
                    debug!(fixture = %entry.name, "{e:?}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(cases)
    }

    fn contains_key(&self, key: (&str, &str)) -> bool {
        self.entries.iter().any(|e| e.key() == key)
    }

    fn upsert(&mut self, entry: FixtureEntry) {
        match self.entries.iter_mut().find(|e| e.key() == entry.key()) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }
}
