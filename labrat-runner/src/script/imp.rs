// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExperimentOptions, HookKind, HookOptions, TestOptions, UnitFn};
use crate::{
    errors::{DeclarationError, TestError},
    helpers::join_title,
    plan::TestPlan,
    runner::{Done, Flags},
    test_filter::TestFilter,
};
use labrat_metadata::FilterMatch;
use std::future::Future;
use tracing::debug;

/// Identifies an experiment within a [`Script`] or [`TestPlan`].
///
/// Experiments are stored in an arena owned by the script. Children are referenced by id from
/// their parent, and each child refers back to its parent by id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ExperimentId(usize);

impl ExperimentId {
    /// The root experiment, which every script has.
    pub const ROOT: Self = Self(0);

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// The root handle for declaring a tree of experiments, tests and hooks.
///
/// Declaration methods attach to the experiment at the cursor. [`Script::experiment`] moves the
/// cursor into the new experiment while its declaration closure runs, so nested calls attach to the
/// right node.
///
/// # Examples
///
/// ```
/// use labrat_runner::script::Script;
///
/// let mut script = Script::new();
/// script
///     .experiment("math", |script| {
///         script.before(|flags| async move {
///             flags.context().insert("base", 40_u32);
///             Ok(())
///         });
///         script.test("adds", |flags| async move {
///             let base = flags.context().get::<u32>("base").expect("set in before");
///             flags.assert(*base + 2 == 42, "addition works")
///         })
///     })
///     .expect("declaration succeeds");
/// ```
#[derive(Debug)]
pub struct Script {
    experiments: Vec<ExperimentNode>,
    cursor: ExperimentId,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    /// Creates a new script with an untitled root experiment.
    pub fn new() -> Self {
        Self {
            experiments: vec![ExperimentNode::new(
                String::new(),
                None,
                ExperimentOptions::default(),
            )],
            cursor: ExperimentId::ROOT,
        }
    }

    /// Declares a child experiment of the experiment at the cursor.
    pub fn experiment<F>(&mut self, title: impl Into<String>, f: F) -> Result<(), DeclarationError>
    where
        F: FnOnce(&mut Script) -> Result<(), DeclarationError>,
    {
        self.experiment_with(title, ExperimentOptions::default(), f)
    }

    /// Declares a child experiment marked `only`.
    pub fn experiment_only<F>(
        &mut self,
        title: impl Into<String>,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: FnOnce(&mut Script) -> Result<(), DeclarationError>,
    {
        self.experiment_with(title, ExperimentOptions::only(), f)
    }

    /// Declares a child experiment marked `skip`.
    pub fn experiment_skip<F>(
        &mut self,
        title: impl Into<String>,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: FnOnce(&mut Script) -> Result<(), DeclarationError>,
    {
        self.experiment_with(title, ExperimentOptions::skip(), f)
    }

    /// Declares a child experiment with explicit options.
    ///
    /// The closure runs synchronously with the cursor moved into the new experiment. The cursor is
    /// restored afterwards, even if the closure returns an error.
    pub fn experiment_with<F>(
        &mut self,
        title: impl Into<String>,
        options: ExperimentOptions,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: FnOnce(&mut Script) -> Result<(), DeclarationError>,
    {
        let title = title.into();
        let parent_id = self.cursor;
        let parent = &self.experiments[parent_id.index()];
        let mut options = options.inherit(&parent.options);

        if options.only {
            if parent.only_experiment {
                let existing = parent
                    .experiments
                    .iter()
                    .map(|id| &self.experiments[id.index()])
                    .find(|sibling| sibling.options.only)
                    .map(|sibling| sibling.title.clone())
                    .unwrap_or_default();
                return Err(DeclarationError::MultipleOnlyExperiments { existing, title });
            }
            // Siblings declared so far lose to this one.
            for sibling in parent.experiments.clone() {
                self.experiments[sibling.index()].options.skip = true;
            }
            self.experiments[parent_id.index()].only_experiment = true;
        } else if parent.only_experiment {
            options.skip = true;
        }

        let id = ExperimentId(self.experiments.len());
        debug!(title = %title, ?id, parent = ?parent_id, "declaring experiment");
        self.experiments
            .push(ExperimentNode::new(title, Some(parent_id), options));
        self.experiments[parent_id.index()].experiments.push(id);

        self.cursor = id;
        let res = f(self);
        self.cursor = parent_id;
        res
    }

    /// Declares an asynchronous test.
    pub fn test<F, Fut>(&mut self, title: impl Into<String>, f: F) -> Result<(), DeclarationError>
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.test_fn(title, TestOptions::default(), Some(UnitFn::from_async(f)))
    }

    /// Declares an asynchronous test marked `only`.
    pub fn test_only<F, Fut>(
        &mut self,
        title: impl Into<String>,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.test_fn(title, TestOptions::only(), Some(UnitFn::from_async(f)))
    }

    /// Declares an asynchronous test marked `skip`.
    pub fn test_skip<F, Fut>(
        &mut self,
        title: impl Into<String>,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.test_fn(title, TestOptions::skip(), Some(UnitFn::from_async(f)))
    }

    /// Declares an asynchronous test with explicit options.
    pub fn test_with<F, Fut>(
        &mut self,
        title: impl Into<String>,
        options: TestOptions,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.test_fn(title, options, Some(UnitFn::from_async(f)))
    }

    /// Declares a test that signals completion through a [`Done`] handle.
    pub fn test_callback<F>(
        &mut self,
        title: impl Into<String>,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: Fn(Flags, Done) + 'static,
    {
        self.test_fn(title, TestOptions::default(), Some(UnitFn::from_callback(f)))
    }

    /// Declares a callback-shaped test with explicit options.
    pub fn test_callback_with<F>(
        &mut self,
        title: impl Into<String>,
        options: TestOptions,
        f: F,
    ) -> Result<(), DeclarationError>
    where
        F: Fn(Flags, Done) + 'static,
    {
        self.test_fn(title, options, Some(UnitFn::from_callback(f)))
    }

    /// Declares a test without a function. It is recorded as a todo.
    pub fn todo(&mut self, title: impl Into<String>) -> Result<(), DeclarationError> {
        self.test_fn(title, TestOptions::default(), None)
    }

    /// Declares a test from a unit of either shape. `None` declares a todo test.
    pub fn test_fn(
        &mut self,
        title: impl Into<String>,
        options: TestOptions,
        func: Option<UnitFn>,
    ) -> Result<(), DeclarationError> {
        let local_title = title.into();
        let experiment_id = self.cursor;
        let path = self.path(experiment_id);
        let title = join_title(
            path.iter()
                .map(|s| s.as_str())
                .chain(std::iter::once(local_title.as_str())),
        );

        let experiment = &mut self.experiments[experiment_id.index()];
        let mut options = options.inherit(&experiment.options);

        if options.only {
            if experiment.only_test {
                let existing = experiment
                    .tests
                    .iter()
                    .find(|sibling| sibling.options.only)
                    .map(|sibling| sibling.title.clone())
                    .unwrap_or_default();
                return Err(DeclarationError::MultipleOnlyTests { existing, title });
            }
            for sibling in &mut experiment.tests {
                sibling.options.skip = true;
            }
            experiment.only_test = true;
        } else if experiment.only_test {
            options.skip = true;
        }

        debug!(title = %title, "declaring test");
        experiment.tests.push(TestNode {
            id: 0,
            filter_match: FilterMatch::Matches,
            experiment: experiment_id,
            path,
            local_title,
            title,
            func,
            options,
        });
        Ok(())
    }

    /// Registers an asynchronous `before` hook on the experiment at the cursor.
    pub fn before<F, Fut>(&mut self, f: F)
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.hook(HookKind::Before, HookOptions::default(), UnitFn::from_async(f));
    }

    /// Registers an asynchronous `after` hook on the experiment at the cursor.
    pub fn after<F, Fut>(&mut self, f: F)
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.hook(HookKind::After, HookOptions::default(), UnitFn::from_async(f));
    }

    /// Registers an asynchronous `before_each` hook on the experiment at the cursor.
    pub fn before_each<F, Fut>(&mut self, f: F)
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.hook(
            HookKind::BeforeEach,
            HookOptions::default(),
            UnitFn::from_async(f),
        );
    }

    /// Registers an asynchronous `after_each` hook on the experiment at the cursor.
    pub fn after_each<F, Fut>(&mut self, f: F)
    where
        F: Fn(Flags) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestError>> + 'static,
    {
        self.hook(
            HookKind::AfterEach,
            HookOptions::default(),
            UnitFn::from_async(f),
        );
    }

    /// Registers a callback-shaped hook of the given kind.
    pub fn hook_callback<F>(&mut self, kind: HookKind, f: F)
    where
        F: Fn(Flags, Done) + 'static,
    {
        self.hook(kind, HookOptions::default(), UnitFn::from_callback(f));
    }

    /// Registers a hook of any kind and shape.
    pub fn hook(&mut self, kind: HookKind, options: HookOptions, func: UnitFn) {
        let experiment = &mut self.experiments[self.cursor.index()];
        let hook = Hook { options, func };
        match kind {
            HookKind::Before => experiment.before.push(hook),
            HookKind::After => experiment.after.push(hook),
            HookKind::BeforeEach => experiment.before_each.push(hook),
            HookKind::AfterEach => experiment.after_each.push(hook),
        }
    }

    /// Finishes declaration and plans the run.
    pub fn into_plan(self, filter: &TestFilter) -> TestPlan {
        TestPlan::new(self, filter)
    }

    pub(crate) fn into_experiments(self) -> Vec<ExperimentNode> {
        self.experiments
    }

    fn path(&self, id: ExperimentId) -> Vec<String> {
        experiment_path(&self.experiments, id)
    }
}

/// Returns the titles of `id` and its ancestors, outermost first. The untitled root is omitted.
pub(crate) fn experiment_path(experiments: &[ExperimentNode], id: ExperimentId) -> Vec<String> {
    let mut path = Vec::new();
    let mut current = Some(id);
    while let Some(id) = current {
        let node = &experiments[id.index()];
        if !node.title.is_empty() {
            path.push(node.title.clone());
        }
        current = node.parent;
    }
    path.reverse();
    path
}

/// A node in the experiment tree.
#[derive(Debug)]
pub struct ExperimentNode {
    pub(crate) title: String,
    pub(crate) parent: Option<ExperimentId>,
    pub(crate) experiments: Vec<ExperimentId>,
    pub(crate) tests: Vec<TestNode>,
    pub(crate) before: Vec<Hook>,
    pub(crate) after: Vec<Hook>,
    pub(crate) before_each: Vec<Hook>,
    pub(crate) after_each: Vec<Hook>,
    pub(crate) options: ExperimentOptions,
    // Whether a child experiment / test at this level is marked only.
    pub(crate) only_experiment: bool,
    pub(crate) only_test: bool,
}

impl ExperimentNode {
    fn new(title: String, parent: Option<ExperimentId>, options: ExperimentOptions) -> Self {
        Self {
            title,
            parent,
            experiments: Vec::new(),
            tests: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            options,
            only_experiment: false,
            only_test: false,
        }
    }

    /// The local title of this experiment. Empty for the root.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The parent experiment, or `None` for the root.
    pub fn parent(&self) -> Option<ExperimentId> {
        self.parent
    }

    /// Child experiments, in declaration order.
    pub fn experiments(&self) -> &[ExperimentId] {
        &self.experiments
    }

    /// Tests, in declaration order.
    pub fn tests(&self) -> &[TestNode] {
        &self.tests
    }

    /// The resolved options of this experiment.
    pub fn options(&self) -> &ExperimentOptions {
        &self.options
    }

    /// Returns the hooks of the given kind, in registration order.
    pub fn hooks(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::Before => &self.before,
            HookKind::After => &self.after,
            HookKind::BeforeEach => &self.before_each,
            HookKind::AfterEach => &self.after_each,
        }
    }

    /// Returns true if a child experiment is marked `only`.
    pub fn has_only_experiment(&self) -> bool {
        self.only_experiment
    }

    /// Returns true if a test is marked `only`.
    pub fn has_only_test(&self) -> bool {
        self.only_test
    }
}

/// A leaf of the experiment tree.
#[derive(Debug)]
pub struct TestNode {
    pub(crate) id: usize,
    pub(crate) filter_match: FilterMatch,
    pub(crate) experiment: ExperimentId,
    pub(crate) path: Vec<String>,
    pub(crate) local_title: String,
    pub(crate) title: String,
    pub(crate) func: Option<UnitFn>,
    pub(crate) options: TestOptions,
}

impl TestNode {
    /// The sequence id, starting at 1. Zero until the test is planned.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the test matched the run's filters.
    pub fn filter_match(&self) -> FilterMatch {
        self.filter_match
    }

    /// The experiment this test belongs to.
    pub fn experiment(&self) -> ExperimentId {
        self.experiment
    }

    /// Titles of the enclosing experiments, snapshotted at declaration.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The title passed at declaration.
    pub fn local_title(&self) -> &str {
        &self.local_title
    }

    /// The full title: the path and the local title joined by spaces.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The resolved options of this test.
    pub fn options(&self) -> &TestOptions {
        &self.options
    }

    /// Returns true if this test was declared without a function.
    pub fn is_todo(&self) -> bool {
        self.func.is_none()
    }
}

/// A hook registered on an experiment.
#[derive(Clone, Debug)]
pub struct Hook {
    pub(crate) options: HookOptions,
    pub(crate) func: UnitFn,
}

impl Hook {
    /// The options of this hook.
    pub fn options(&self) -> &HookOptions {
        &self.options
    }
}
