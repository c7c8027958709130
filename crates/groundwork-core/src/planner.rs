use crate::CoreError;
use groundwork_schema::{Manifest, Step};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Produce,
    Consume,
}

/// Paths a step touches, in the order produce-then-consume.
pub fn accesses(step: &Step) -> impl Iterator<Item = (&Path, Access)> {
    step.produces()
        .map(|p| (p, Access::Produce))
        .into_iter()
        .chain(step.consumes().map(|p| (p, Access::Consume)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    /// 0-based position in the manifest.
    pub index: usize,
    pub step: Step,
    /// Indices of earlier steps that must finish (Succeeded or Skipped) first.
    pub depends_on: Vec<usize>,
}

impl PlannedStep {
    pub fn is_exclusive(&self) -> bool {
        self.step.is_exclusive()
    }
}

/// Steps in execution order with their dependency edges. Manifest order is
/// kept: every edge points from a later step to an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub steps: Vec<PlannedStep>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter()
    }
}

type ExistsProbe = Box<dyn Fn(&Path) -> bool + Send + Sync>;

pub struct ProvisionPlanner {
    exists: ExistsProbe,
}

impl Default for ProvisionPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionPlanner {
    /// Planner that checks pre-existing inputs against the real filesystem.
    pub fn new() -> Self {
        Self::with_probe(Path::exists)
    }

    /// Planner with a custom existence check, for planning against a
    /// filesystem other than the local one.
    pub fn with_probe(probe: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        Self {
            exists: Box::new(probe),
        }
    }

    /// Validate `manifest` and derive the dependency graph.
    ///
    /// A later step depends on an earlier one when a path either of them
    /// touches overlaps (equals, or is an ancestor of) a path the other
    /// touches and at least one side writes it. A consumed path must be
    /// covered by an earlier producer or already exist.
    pub fn plan(&self, manifest: &Manifest) -> Result<Plan, CoreError> {
        manifest.validate()?;

        let mut steps: Vec<PlannedStep> = Vec::with_capacity(manifest.steps.len());
        for (index, step) in manifest.steps.iter().enumerate() {
            let depends_on = steps
                .iter()
                .filter(|earlier| conflicts(&earlier.step, step))
                .map(|earlier| earlier.index)
                .collect::<Vec<_>>();

            if let Some(input) = step.consumes() {
                let produced_earlier = steps
                    .iter()
                    .filter_map(|earlier| earlier.step.produces())
                    .any(|out| input.starts_with(out));
                if !produced_earlier && !(self.exists)(input) {
                    return Err(CoreError::UnresolvedInput {
                        step: index + 1,
                        kind: step.kind(),
                        path: input.to_path_buf(),
                    });
                }
            }

            debug!("planned step {index} ({}) after {depends_on:?}", step.kind());
            steps.push(PlannedStep {
                index,
                step: step.clone(),
                depends_on,
            });
        }
        Ok(Plan { steps })
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

fn conflicts(earlier: &Step, later: &Step) -> bool {
    accesses(earlier).any(|(a, a_access)| {
        accesses(later).any(|(b, b_access)| {
            (a_access == Access::Produce || b_access == Access::Produce) && overlaps(a, b)
        })
    })
}
