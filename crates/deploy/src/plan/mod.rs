//! The deployment plan: a DAG of steps.
//!
//! Recipes add steps to a shared [`Plan`]. A step may only depend on steps that
//! were added before it, so a plan built through [`Plan::add`] is acyclic by
//! construction. Plans assembled from raw steps go through [`Plan::from_steps`],
//! which checks the same properties.

mod step;

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;

use crate::k8s::Object;

pub use step::{Action, CopyFile, RemoteCommand, Scope, Step, StepId, StepKind, Teardown};

#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
    index: HashMap<StepId, usize>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from raw steps and validate it.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self> {
        let mut index = HashMap::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), position).is_some() {
                anyhow::bail!("Duplicate step id: {}", step.id);
            }
        }

        let plan = Self { steps, index };
        plan.validate()?;
        Ok(plan)
    }

    /// Add a step. Fails if the id is taken or a dependency is not declared yet.
    pub fn add(
        &mut self,
        id: StepId,
        kind: StepKind,
        action: Action,
        depends_on: &[StepId],
    ) -> Result<StepId> {
        if self.index.contains_key(&id) {
            anyhow::bail!("Duplicate step id: {}", id);
        }

        for dependency in depends_on {
            if !self.index.contains_key(dependency) {
                anyhow::bail!("Step {} depends on undeclared step {}", id, dependency);
            }
        }

        let mut deps: Vec<StepId> = Vec::with_capacity(depends_on.len());
        for dependency in depends_on {
            if !deps.contains(dependency) {
                deps.push(dependency.clone());
            }
        }

        tracing::trace!(step = %id, %kind, "Adding step to plan");

        self.index.insert(id.clone(), self.steps.len());
        self.steps.push(Step {
            id: id.clone(),
            kind,
            action,
            depends_on: deps,
        });

        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in insertion order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, id: &StepId) -> Option<&Step> {
        self.index.get(id).map(|&position| &self.steps[position])
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.index.contains_key(id)
    }

    /// Steps whose id lies under `scope`.
    pub fn under<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a Step> + 'a {
        self.steps.iter().filter(move |step| scope.contains(&step.id))
    }

    /// Kinds of the steps under `scope`, in insertion order.
    pub fn kinds_under(&self, scope: &Scope) -> Vec<StepKind> {
        self.under(scope).map(|step| step.kind).collect()
    }

    /// All declared Kubernetes objects.
    pub fn objects(&self) -> impl Iterator<Item = (&StepId, &Object)> {
        self.steps.iter().filter_map(|step| match &step.action {
            Action::Apply(object) => Some((&step.id, object.as_ref())),
            _ => None,
        })
    }

    /// Check that every dependency exists, that there is no cycle and that no
    /// two steps declare the same Kubernetes object.
    pub fn validate(&self) -> Result<()> {
        for step in &self.steps {
            for dependency in &step.depends_on {
                if !self.index.contains_key(dependency) {
                    anyhow::bail!(
                        "Step {} depends on undeclared step {}",
                        step.id,
                        dependency
                    );
                }
            }
        }

        let mut seen = HashMap::new();
        for (id, object) in self.objects() {
            let key = (object.kind(), object.namespace(), object.name());
            if let Some(previous) = seen.insert(key, id) {
                anyhow::bail!(
                    "{} {} is declared by both {} and {}",
                    object.kind(),
                    object.name(),
                    previous,
                    id
                );
            }
        }

        self.waves().map(|_| ())
    }

    /// Group steps into waves: every step's dependencies lie in earlier waves.
    ///
    /// Steps of one wave are independent of each other and may run concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<&Step>>> {
        let mut indegree: Vec<usize> = self.steps.iter().map(|s| s.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];

        for (position, step) in self.steps.iter().enumerate() {
            for dependency in &step.depends_on {
                let Some(&parent) = self.index.get(dependency) else {
                    anyhow::bail!(
                        "Step {} depends on undeclared step {}",
                        step.id,
                        dependency
                    );
                };
                dependents[parent].push(position);
            }
        }

        let mut ready: Vec<usize> = (0..self.steps.len())
            .filter(|&position| indegree[position] == 0)
            .collect();
        let mut waves = Vec::new();
        let mut visited = 0;

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &position in &ready {
                for &child in &dependents[position] {
                    indegree[child] -= 1;
                    if indegree[child] == 0 {
                        next.push(child);
                    }
                }
            }

            visited += ready.len();
            waves.push(ready.iter().map(|&position| &self.steps[position]).collect());
            next.sort_unstable();
            ready = next;
        }

        if visited != self.steps.len() {
            let stuck: Vec<String> = indegree
                .iter()
                .enumerate()
                .filter(|(_, degree)| **degree > 0)
                .map(|(position, _)| self.steps[position].id.to_string())
                .collect();
            anyhow::bail!("Dependency cycle between steps: {}", stuck.join(", "));
        }

        Ok(waves)
    }

    /// Whether `step` depends on `ancestor`, directly or through other steps.
    pub fn depends_on_transitively(&self, step: &StepId, ancestor: &StepId) -> bool {
        let Some(start) = self.get(step) else {
            return false;
        };

        let mut queue: VecDeque<&StepId> = start.depends_on.iter().collect();
        let mut seen: HashSet<&StepId> = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.get(current) {
                queue.extend(next.depends_on.iter());
            }
        }

        false
    }
}
