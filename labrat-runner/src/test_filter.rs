// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering tests based on user-specified parameters.
//!
//! The main structure in this module is [`TestFilter`], which combines an [`IdFilter`] and a grep
//! pattern. Both filters must match for a test to be included.

use crate::{
    config::RunSettings,
    errors::{IdFilterParseError, TestFilterBuildError},
};
use labrat_metadata::{FilterMatch, MismatchReason};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::{fmt, ops::RangeInclusive, str::FromStr};

/// A set of sequence ids, built from individual ids and inclusive ranges such as `1-4`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IdFilter {
    // Sorted, non-overlapping and non-adjacent.
    ranges: Vec<RangeInclusive<usize>>,
}

impl IdFilter {
    /// Creates a new, empty filter.
    ///
    /// An empty filter matches no tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single id.
    pub fn insert(&mut self, id: usize) -> &mut Self {
        self.insert_range(id..=id)
    }

    /// Adds an inclusive range of ids. Empty ranges are ignored.
    pub fn insert_range(&mut self, range: RangeInclusive<usize>) -> &mut Self {
        if range.is_empty() {
            return self;
        }
        self.ranges.push(range);
        self.normalize();
        self
    }

    /// Returns true if `id` is in the filter.
    pub fn contains(&self, id: usize) -> bool {
        // ranges is sorted by start, so binary search over the end bounds.
        let idx = self.ranges.partition_point(|range| *range.end() < id);
        self.ranges
            .get(idx)
            .is_some_and(|range| range.contains(&id))
    }

    /// Returns true if the filter contains no ids.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn normalize(&mut self) {
        self.ranges.sort_unstable_by_key(|range| *range.start());
        let mut merged: Vec<RangeInclusive<usize>> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if *range.start() <= last.end().saturating_add(1) => {
                    if range.end() > last.end() {
                        *last = *last.start()..=*range.end();
                    }
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    fn insert_spec(&mut self, input: &str, spec: &str) -> Result<(), IdFilterParseError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(IdFilterParseError::new(input, "empty id"));
        }

        match spec.split_once('-') {
            Some((from, to)) => {
                let from = parse_id(input, from)?;
                let to = parse_id(input, to)?;
                if from > to {
                    return Err(IdFilterParseError::new(
                        input,
                        format!("range {from}-{to} has its start after its end"),
                    ));
                }
                self.insert_range(from..=to);
            }
            None => {
                self.insert(parse_id(input, spec)?);
            }
        }
        Ok(())
    }
}

fn parse_id(input: &str, s: &str) -> Result<usize, IdFilterParseError> {
    let s = s.trim();
    let id: usize = s
        .parse()
        .map_err(|err| IdFilterParseError::new(input, format!("failed to parse `{s}`: {err}")))?;
    if id == 0 {
        return Err(IdFilterParseError::new(input, "ids start at 1"));
    }
    Ok(id)
}

impl FromStr for IdFilter {
    type Err = IdFilterParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // The input looks like "1,3-5, 8".
        let mut filter = Self::new();
        for spec in input.split(',') {
            filter.insert_spec(input, spec)?;
        }
        Ok(filter)
    }
}

impl fmt::Display for IdFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, range) in self.ranges.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            if range.start() == range.end() {
                write!(f, "{}", range.start())?;
            } else {
                write!(f, "{}-{}", range.start(), range.end())?;
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for IdFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IdSpec {
            Id(usize),
            Spec(String),
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IdFilterRepr {
            Id(usize),
            Spec(String),
            List(Vec<IdSpec>),
        }

        let mut filter = IdFilter::new();
        let specs = match IdFilterRepr::deserialize(deserializer)? {
            IdFilterRepr::Id(id) => vec![IdSpec::Id(id)],
            IdFilterRepr::Spec(spec) => vec![IdSpec::Spec(spec)],
            IdFilterRepr::List(specs) => specs,
        };
        for spec in specs {
            match spec {
                IdSpec::Id(0) => return Err(serde::de::Error::custom("ids start at 1")),
                IdSpec::Id(id) => {
                    filter.insert(id);
                }
                IdSpec::Spec(spec) => {
                    let parsed: IdFilter = spec.parse().map_err(serde::de::Error::custom)?;
                    for range in parsed.ranges {
                        filter.insert_range(range);
                    }
                }
            }
        }
        Ok(filter)
    }
}

/// Filters tests by sequence id and by full title.
#[derive(Clone, Debug, Default)]
pub struct TestFilter {
    ids: Option<IdFilter>,
    grep: Option<Regex>,
}

impl TestFilter {
    /// Creates a filter that matches every test.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a new filter. `None` for either part means that part matches everything.
    pub fn new(ids: Option<IdFilter>, grep: Option<&str>) -> Result<Self, TestFilterBuildError> {
        let grep = grep
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| TestFilterBuildError::Grep {
                    pattern: pattern.to_owned(),
                    err,
                })
            })
            .transpose()?;
        Ok(Self { ids, grep })
    }

    /// Creates a new filter from the `id` and `grep` run settings.
    pub fn from_settings(settings: &RunSettings) -> Result<Self, TestFilterBuildError> {
        Self::new(settings.id.clone(), settings.grep.as_deref())
    }

    /// Returns whether a test with the given sequence id and full title is included.
    pub fn filter_match(&self, id: usize, title: &str) -> FilterMatch {
        if let Some(ids) = &self.ids {
            if !ids.contains(id) {
                return FilterMatch::Mismatch {
                    reason: MismatchReason::Id,
                };
            }
        }
        if let Some(grep) = &self.grep {
            if !grep.is_match(title) {
                return FilterMatch::Mismatch {
                    reason: MismatchReason::Grep,
                };
            }
        }
        FilterMatch::Matches
    }
}
