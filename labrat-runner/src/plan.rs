// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Planning a run: assigning sequence ids and resolving filters.
//!
//! Planning walks the finished experiment tree once. It never invokes user code.

use crate::{
    script::{ExperimentId, ExperimentNode, Hook, Script, TestNode, experiment_path},
    test_filter::TestFilter,
};
use tracing::debug;

/// A declared experiment tree with sequence ids assigned and filters resolved.
///
/// Sequence ids start at 1 and are assigned to every test in depth-first pre-order, regardless of
/// filters: an experiment's own tests are numbered before the tests of its child experiments. This
/// is the order in which the runner reaches them, so ids printed by a previous run can be used to
/// select tests in the next one.
#[derive(Debug)]
pub struct TestPlan {
    experiments: Vec<ExperimentNode>,
    // Number of tests matching the filter in each experiment's subtree, indexed like `experiments`.
    included: Vec<usize>,
    test_count: usize,
}

impl TestPlan {
    /// Plans a run of `script` with the given filter.
    pub fn new(script: Script, filter: &TestFilter) -> Self {
        let mut experiments = script.into_experiments();
        let mut included = vec![0; experiments.len()];
        let mut next_id = 1;

        assign(
            &mut experiments,
            &mut included,
            ExperimentId::ROOT,
            filter,
            &mut next_id,
        );

        let test_count = next_id - 1;
        debug!(
            test_count,
            included = included[ExperimentId::ROOT.index()],
            "planned run"
        );
        Self {
            experiments,
            included,
            test_count,
        }
    }

    /// Returns the experiment with the given id.
    pub fn experiment(&self, id: ExperimentId) -> &ExperimentNode {
        &self.experiments[id.index()]
    }

    /// Returns the root experiment.
    pub fn root(&self) -> &ExperimentNode {
        self.experiment(ExperimentId::ROOT)
    }

    /// Returns the titles of the experiment and its ancestors, outermost first.
    pub fn experiment_path(&self, id: ExperimentId) -> Vec<String> {
        experiment_path(&self.experiments, id)
    }

    /// Returns the number of declared tests, whether or not they match the filter.
    pub fn test_count(&self) -> usize {
        self.test_count
    }

    /// Returns the number of tests in the subtree rooted at `id` that match the filter.
    pub fn included_count(&self, id: ExperimentId) -> usize {
        self.included[id.index()]
    }

    /// Iterates over every declared test in sequence-id order.
    pub fn iter_tests(&self) -> impl Iterator<Item = &TestNode> + '_ {
        let mut stack = vec![ExperimentId::ROOT];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let experiment = &self.experiments[id.index()];
            stack.extend(experiment.experiments.iter().rev().copied());
            Some(experiment.tests.iter())
        })
        .flatten()
    }

    /// Returns the `before_each` hooks that apply to tests in `id`, outermost experiment first.
    pub(crate) fn before_each_chain(&self, id: ExperimentId) -> Vec<&Hook> {
        let mut chain: Vec<_> = self
            .ancestors(id)
            .flat_map(|experiment| experiment.before_each.iter().rev())
            .collect();
        chain.reverse();
        chain
    }

    /// Returns the `after_each` hooks that apply to tests in `id`, innermost experiment first.
    pub(crate) fn after_each_chain(&self, id: ExperimentId) -> Vec<&Hook> {
        self.ancestors(id)
            .flat_map(|experiment| experiment.after_each.iter())
            .collect()
    }

    /// Iterates from `id` up to the root, inclusive.
    fn ancestors(&self, id: ExperimentId) -> impl Iterator<Item = &ExperimentNode> + '_ {
        let mut current = Some(id);
        std::iter::from_fn(move || {
            let experiment = &self.experiments[current?.index()];
            current = experiment.parent;
            Some(experiment)
        })
    }
}

fn assign(
    experiments: &mut [ExperimentNode],
    included: &mut [usize],
    id: ExperimentId,
    filter: &TestFilter,
    next_id: &mut usize,
) -> usize {
    let mut count = 0;
    for test in &mut experiments[id.index()].tests {
        test.id = *next_id;
        *next_id += 1;
        test.filter_match = filter.filter_match(test.id, &test.title);
        if test.filter_match.is_match() {
            count += 1;
        }
    }

    let children = experiments[id.index()].experiments.clone();
    for child in children {
        count += assign(experiments, included, child, filter, next_id);
    }

    included[id.index()] = count;
    count
}
