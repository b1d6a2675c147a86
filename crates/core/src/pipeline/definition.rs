//! Lineages and their transition tables.
//!
//! A lineage owns a disjoint set of stages. Every edge starts and ends
//! inside its lineage, so an item can never be routed to a queue belonging
//! to another lineage. The only cycle is the resubmission edge out of a
//! lineage's error stage, bounded by the item's attempt cap.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use super::PipelineError;
use crate::item::Outcome;
use crate::topology::QueueCatalog;

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "stage", rename_all = "snake_case")]
pub enum Target {
    Stage(String),
    /// Stay at the current stage, parked for an operator decision.
    Hold,
    TerminalSuccess,
    TerminalFailed,
}

/// Where a resubmitted item goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "stage", rename_all = "snake_case")]
pub enum ResubmitTarget {
    /// Always restart at this stage.
    Stage(String),
    /// Retry the stage that failed.
    FailedStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub outcome: Outcome,
    pub to: Target,
}

/// A connected family of stages.
#[derive(Debug, Clone, Serialize)]
pub struct Lineage {
    pub name: String,
    pub entries: Vec<String>,
    /// All stages in first-mention order, error stage included.
    pub stages: Vec<String>,
    pub edges: Vec<Edge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resubmit: Option<ResubmitTarget>,
}

impl Lineage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            stages: Vec::new(),
            edges: Vec::new(),
            error_stage: None,
            resubmit: None,
        }
    }

    /// Mark a stage as a place where new items may enter.
    pub fn entry(mut self, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        self.add_stage(&stage);
        self.entries.push(stage);
        self
    }

    pub fn on_success(mut self, from: impl Into<String>, to: Target) -> Self {
        let from = from.into();
        self.add_stage(&from);
        if let Target::Stage(ref s) = to {
            self.add_stage(s);
        }
        self.edges.push(Edge {
            from,
            outcome: Outcome::Success,
            to,
        });
        self
    }

    /// Chain stages on Success, the last one reaching Terminal-Success.
    pub fn success_chain<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        for pair in stages.windows(2) {
            self = self.on_success(pair[0].clone(), Target::Stage(pair[1].clone()));
        }
        if let Some(last) = stages.last() {
            self = self.on_success(last.clone(), Target::TerminalSuccess);
        }
        self
    }

    /// Failures and timeouts at this stage park the item instead of
    /// routing it to the error stage.
    pub fn hold_on_failure(mut self, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        self.add_stage(&stage);
        for outcome in [Outcome::Failure, Outcome::Timeout] {
            self.edges.push(Edge {
                from: stage.clone(),
                outcome,
                to: Target::Hold,
            });
        }
        self
    }

    pub fn error_stage(mut self, stage: impl Into<String>, resubmit: ResubmitTarget) -> Self {
        let stage = stage.into();
        self.add_stage(&stage);
        if let ResubmitTarget::Stage(ref s) = resubmit {
            self.add_stage(s);
        }
        self.error_stage = Some(stage);
        self.resubmit = Some(resubmit);
        self
    }

    fn add_stage(&mut self, stage: &str) {
        if !self.stages.iter().any(|s| s == stage) {
            self.stages.push(stage.to_string());
        }
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    pub fn is_entry(&self, stage: &str) -> bool {
        self.entries.iter().any(|s| s == stage)
    }

    pub fn is_error_stage(&self, stage: &str) -> bool {
        self.error_stage.as_deref() == Some(stage)
    }

    /// The explicit edge for `(from, outcome)`, if any.
    pub fn edge(&self, from: &str, outcome: Outcome) -> Option<&Target> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.outcome == outcome)
            .map(|e| &e.to)
    }

    /// Stage a resubmitted item re-enters, given the stage it failed at.
    pub fn resubmit_stage<'a>(&'a self, failed_stage: Option<&'a str>) -> Option<&'a str> {
        match self.resubmit.as_ref()? {
            ResubmitTarget::Stage(s) => Some(s),
            ResubmitTarget::FailedStage => failed_stage.filter(|s| self.contains(s)),
        }
    }

    fn check(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Definition(format!("{}: {}", self.name, msg)));

        if self.entries.is_empty() {
            return fail("no entry stage".to_string());
        }
        for stage in &self.stages {
            if self.is_error_stage(stage) {
                if self.edges.iter().any(|e| &e.from == stage) {
                    return fail(format!("error stage {} has outgoing edges", stage));
                }
                if self.is_entry(stage) {
                    return fail(format!("error stage {} cannot be an entry", stage));
                }
            } else if self.edge(stage, Outcome::Success).is_none() {
                return fail(format!("stage {} has no success edge", stage));
            }
        }
        for edge in &self.edges {
            if let Target::Stage(ref to) = edge.to {
                if self.is_error_stage(to) {
                    return fail(format!("edge {} -> {} enters the error stage", edge.from, to));
                }
            }
        }
        if let Some(ResubmitTarget::Stage(ref s)) = self.resubmit {
            if self.is_error_stage(s) {
                return fail("resubmission cannot target the error stage".to_string());
            }
        }
        Ok(())
    }
}

/// The full set of lineages, indexed by stage.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineDefinition {
    lineages: Vec<Lineage>,
    #[serde(skip)]
    by_stage: HashMap<String, usize>,
}

impl PipelineDefinition {
    /// Build and check a definition. Fails if a stage appears in two
    /// lineages or any lineage is internally inconsistent.
    pub fn new(lineages: Vec<Lineage>) -> Result<Self, PipelineError> {
        let mut by_stage = HashMap::new();
        let mut names = HashSet::new();

        for (idx, lineage) in lineages.iter().enumerate() {
            if !names.insert(lineage.name.as_str()) {
                return Err(PipelineError::Definition(format!(
                    "duplicate lineage {}",
                    lineage.name
                )));
            }
            lineage.check()?;
            for stage in &lineage.stages {
                if let Some(&other) = by_stage.get(stage) {
                    let other: &Lineage = &lineages[other];
                    return Err(PipelineError::Definition(format!(
                        "stage {} belongs to both {} and {}",
                        stage, other.name, lineage.name
                    )));
                }
                by_stage.insert(stage.clone(), idx);
            }
        }

        Ok(Self { lineages, by_stage })
    }

    /// FC submission, PULSE crawl-to-SIP, index, and one lineage per
    /// datacenter.
    pub fn standard() -> Self {
        let mut lineages = vec![
            Lineage::new("fc")
                .entry("FC-SIPS")
                .success_chain(["FC-SIPS", "FC-SUB", "FC-ALL"])
                .hold_on_failure("FC-SUB")
                .error_stage("FC-ERR", ResubmitTarget::Stage("FC-SIPS".to_string())),
            Lineage::new("pulse")
                .entry("PULSE01")
                .success_chain(["PULSE01", "PULSE02", "PULSE03", "PULSE04", "PULSE05"])
                .error_stage("PULSE06", ResubmitTarget::Stage("PULSE01".to_string())),
            Lineage::new("index")
                .entry("PULSE10")
                .entry("PULSE11")
                .on_success("PULSE10", Target::TerminalSuccess)
                .on_success("PULSE11", Target::TerminalSuccess)
                .error_stage("PULSE09", ResubmitTarget::FailedStage),
        ];
        for dc in 0..4 {
            let stage = format!("DC{}", dc);
            lineages.push(
                Lineage::new(format!("dc{}", dc))
                    .entry(stage.clone())
                    .on_success(stage, Target::TerminalSuccess),
            );
        }

        // Static table; the checks in `new` cannot fail for it.
        let mut by_stage = HashMap::new();
        for (idx, lineage) in lineages.iter().enumerate() {
            for stage in &lineage.stages {
                by_stage.insert(stage.clone(), idx);
            }
        }
        Self { lineages, by_stage }
    }

    /// Every stage must resolve to a queue in the catalog.
    pub fn validate_against(&self, catalog: &QueueCatalog) -> Result<(), PipelineError> {
        let missing: Vec<&str> = self
            .by_stage
            .keys()
            .filter(|stage| !catalog.contains(stage))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            let mut missing = missing;
            missing.sort_unstable();
            Err(PipelineError::Definition(format!(
                "stages without a queue: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn lineage_of(&self, stage: &str) -> Option<&Lineage> {
        self.by_stage.get(stage).map(|&i| &self.lineages[i])
    }

    pub fn lineage(&self, name: &str) -> Option<&Lineage> {
        self.lineages.iter().find(|l| l.name == name)
    }

    pub fn lineages(&self) -> &[Lineage] {
        &self.lineages
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.lineages
            .iter()
            .flat_map(|l| l.stages.iter().map(String::as_str))
    }

    /// The stage id equal to `key` ignoring ASCII case.
    pub fn canonical_stage(&self, key: &str) -> Option<&str> {
        self.stages().find(|stage| stage.eq_ignore_ascii_case(key))
    }

    /// Re-key per-stage timeouts by canonical stage id. Environment
    /// overrides arrive lowercased, so a key that only matches ignoring case
    /// wins over the exact one. Keys naming no stage are an error.
    pub fn resolve_stage_timeouts(
        &self,
        timeouts: &BTreeMap<String, u64>,
    ) -> Result<BTreeMap<String, u64>, PipelineError> {
        let mut exact = BTreeMap::new();
        let mut folded = BTreeMap::new();
        for (key, &secs) in timeouts {
            let stage = self
                .canonical_stage(key)
                .ok_or_else(|| PipelineError::UnknownStage(key.clone()))?;
            if stage == key {
                exact.insert(stage.to_string(), secs);
            } else {
                folded.insert(stage.to_string(), secs);
            }
        }
        exact.extend(folded);
        Ok(exact)
    }
}
