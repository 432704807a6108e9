use crate::registry::AgentRegistry;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use troupe_core::{AgentSpec, AgentStatus, RoleId, TroupeError, TroupeResult};

/// Dependency graph over the declared agents.
///
/// Built once per run. Construction rejects duplicate roles, unknown
/// dependencies and cycles, so every later query can assume a valid DAG.
#[derive(Debug, Clone)]
pub struct DependencyScheduler {
    /// Enabled roles in declaration order.
    order: Vec<RoleId>,
    /// Effective dependencies: edges to disabled roles are dropped.
    deps: HashMap<RoleId, Vec<RoleId>>,
    dependents: HashMap<RoleId, Vec<RoleId>>,
}

impl DependencyScheduler {
    pub fn new(specs: &[AgentSpec]) -> TroupeResult<Self> {
        let mut declared: HashMap<&RoleId, &AgentSpec> = HashMap::new();
        for spec in specs {
            if declared.insert(&spec.role, spec).is_some() {
                return Err(TroupeError::Config(format!(
                    "Duplicate agent role '{}'",
                    spec.role
                )));
            }
        }
        for spec in specs {
            for dep in &spec.depends_on {
                if dep == &spec.role {
                    return Err(TroupeError::CircularDependency {
                        cycle: vec![spec.role.clone(), spec.role.clone()],
                    });
                }
                if !declared.contains_key(dep) {
                    return Err(TroupeError::Config(format!(
                        "Agent '{}' depends on unknown agent '{}'",
                        spec.role, dep
                    )));
                }
            }
        }

        // Cycles are checked over the declared graph, disabled agents included.
        let mut visit: HashMap<RoleId, u8> = HashMap::new();
        let mut path = Vec::new();
        for spec in specs {
            detect_cycle(&spec.role, &declared, &mut visit, &mut path)?;
        }

        let mut order = Vec::new();
        let mut deps = HashMap::new();
        let mut dependents: HashMap<RoleId, Vec<RoleId>> = HashMap::new();
        for spec in specs.iter().filter(|s| s.enabled) {
            let mut effective = Vec::new();
            for dep in &spec.depends_on {
                let enabled = declared.get(dep).is_some_and(|d| d.enabled);
                if enabled {
                    effective.push(dep.clone());
                    dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(spec.role.clone());
                } else {
                    warn!(
                        role = %spec.role,
                        dependency = %dep,
                        "Dependency is disabled, treating it as satisfied"
                    );
                }
            }
            order.push(spec.role.clone());
            deps.insert(spec.role.clone(), effective);
        }

        Ok(Self {
            order,
            deps,
            dependents,
        })
    }

    /// Idle agents whose dependencies are all `done`, in declaration order.
    pub fn eligible(&self, registry: &AgentRegistry) -> Vec<RoleId> {
        self.order
            .iter()
            .filter(|role| registry.status(role.as_str()) == Some(AgentStatus::Idle))
            .filter(|role| {
                self.dependencies_of(role.as_str())
                    .iter()
                    .all(|dep| registry.status(dep.as_str()) == Some(AgentStatus::Done))
            })
            .cloned()
            .collect()
    }

    /// A topological order of the enabled agents. Ties are broken by
    /// declaration order.
    pub fn execution_order(&self) -> Vec<RoleId> {
        let mut placed: HashSet<&RoleId> = HashSet::new();
        let mut result = Vec::with_capacity(self.order.len());
        while result.len() < self.order.len() {
            let next = self.order.iter().find(|role| {
                !placed.contains(role)
                    && self
                        .dependencies_of(role.as_str())
                        .iter()
                        .all(|dep| placed.contains(dep))
            });
            match next {
                Some(role) => {
                    placed.insert(role);
                    result.push(role.clone());
                }
                // Unreachable for a validated graph.
                None => break,
            }
        }
        result
    }

    /// Enabled roles in declaration order.
    pub fn roles(&self) -> &[RoleId] {
        &self.order
    }

    pub fn dependencies_of(&self, role: &str) -> &[RoleId] {
        self.deps.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of `role`.
    pub fn dependents_of(&self, role: &str) -> &[RoleId] {
        self.dependents.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every agent that transitively depends on `role`, in declaration order.
    pub fn downstream_of(&self, role: &str) -> Vec<RoleId> {
        let mut seen: HashSet<&RoleId> = HashSet::new();
        let mut queue: VecDeque<&RoleId> = self.dependents_of(role).iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.dependents_of(next.as_str()));
            }
        }
        self.order
            .iter()
            .filter(|r| seen.contains(r))
            .cloned()
            .collect()
    }
}

fn detect_cycle(
    role: &RoleId,
    declared: &HashMap<&RoleId, &AgentSpec>,
    visit: &mut HashMap<RoleId, u8>,
    path: &mut Vec<RoleId>,
) -> TroupeResult<()> {
    match visit.get(role) {
        Some(1) => {
            // back edge: the cycle is the path from the first visit of `role`
            let start = path.iter().position(|r| r == role).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(role.clone());
            return Err(TroupeError::CircularDependency { cycle });
        }
        Some(2) => return Ok(()),
        _ => {}
    }
    visit.insert(role.clone(), 1);
    path.push(role.clone());
    if let Some(spec) = declared.get(role) {
        for dep in &spec.depends_on {
            detect_cycle(dep, declared, visit, path)?;
        }
    }
    path.pop();
    visit.insert(role.clone(), 2);
    Ok(())
}
