use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::case::{BuildContext, DefRef, ResetSysEnv, TestCase, instantiate};
use crate::error::CoreError;
use crate::fixture::registry::FixtureRegistry;
use crate::runtime::Runtime;
use crate::version::{Version, VersionValidator};

/// Top-level registry of test definitions and their construction recipes.
///
/// Definitions are kept in registration order; `instantiate_all` turns
/// them into the final flat list of cases, expanding the fixture graph
/// level by level as it grows.
#[derive(Default)]
pub struct TestRegistry {
    tests: Vec<(DefRef, Vec<usize>)>,
    skip: HashSet<String>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition after gating it against the framework
    /// version. Returns whether any recipes were added: an incompatible
    /// definition is skipped with a warning, a compatible one gets one
    /// recipe per variant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Registration`] for an abstract definition and
    /// [`CoreError::VersionFormat`] for a malformed compatibility
    /// expression.
    pub fn register(&mut self, def: DefRef, framework: &Version) -> Result<bool, CoreError> {
        if def.is_abstract() {
            return Err(CoreError::Registration(format!(
                "cannot register abstract test {:?}",
                def.qualname()
            )));
        }

        let required = def.required_version();
        let conditions = required
            .iter()
            .map(|expr| VersionValidator::new(expr))
            .collect::<Result<Vec<_>, _>>()?;
        if !conditions.is_empty() && !conditions.iter().any(|c| c.validate(framework)) {
            warn!(
                test = %def.qualname(),
                "skipping incompatible test: not valid for framework version {framework}"
            );
            return Ok(false);
        }

        for variant in 0..def.num_variants() {
            self.add(Arc::clone(&def), variant);
        }
        Ok(true)
    }

    /// Append a construction recipe for one variant of a definition.
    pub fn add(&mut self, def: DefRef, variant: usize) {
        match self
            .tests
            .iter_mut()
            .find(|(d, _)| d.qualname() == def.qualname())
        {
            Some((_, variants)) => variants.push(variant),
            None => self.tests.push((def, vec![variant])),
        }
    }

    /// Exclude a definition from instantiation. Legacy compatibility
    /// path; registered recipes for it are ignored.
    pub fn skip(&mut self, def: &DefRef) {
        self.skip.insert(def.qualname().to_owned());
    }

    /// Registered definitions, in registration order.
    pub fn defs(&self) -> impl Iterator<Item = &DefRef> {
        self.tests.iter().map(|(d, _)| d)
    }

    pub fn contains(&self, qualname: &str) -> bool {
        self.tests.iter().any(|(d, _)| d.qualname() == qualname)
    }

    /// Instantiate every registered recipe, then expand the fixture graph.
    ///
    /// The leaf tests are built first; fixtures can only establish their
    /// exact dependencies at construction time, so the dependency graph
    /// grows dynamically. Expansion is level-order: each wave's private
    /// fixture registries are combined, reduced by `difference` against
    /// everything already seen, and the genuinely new entries become the
    /// next wave. The difference against the accumulated registry is what
    /// guarantees at most one instance per distinct scoped fixture name
    /// across the whole graph.
    ///
    /// A construction that fails with an expected error is logged and
    /// dropped without aborting the batch.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or registration error raised while
    /// building a case or injecting its fixtures.
    pub fn instantiate_all(
        &self,
        rt: &Runtime,
        reset: ResetSysEnv,
    ) -> Result<Vec<TestCase>, CoreError> {
        let mut wave = Vec::new();
        for (def, variants) in &self.tests {
            if self.skip.contains(def.qualname()) {
                continue;
            }
            for &variant in variants {
                let ctx = BuildContext::for_variant(variant, reset);
                match instantiate(def, &ctx, rt) {
                    Ok(case) => wave.push(case),
                    Err(e) if e.is_expected() => {
                        warn!(test = %def.qualname(), "skipping test: {e}");
                        debug!(test = %def.qualname(), "{e:?}");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut final_cases = Vec::new();
        let mut seen = FixtureRegistry::new();
        while !wave.is_empty() {
            let mut discovered = FixtureRegistry::new();
            for mut case in wave.drain(..) {
                if let Some(reg) = case.take_fixture_registry() {
                    discovered.update(reg);
                }
                final_cases.push(case);
            }

            let fresh = discovered.difference(&seen);
            if fresh.is_empty() {
                break;
            }
            wave = fresh.instantiate_all(rt)?;
            seen.update(fresh);
        }

        debug!(cases = final_cases.len(), "instantiation finished");
        Ok(final_cases)
    }
}
