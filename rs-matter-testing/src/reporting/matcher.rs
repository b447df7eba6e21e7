/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Matching policies applied by the accumulator to its report history.
//!
//! Three policies exist, each with its own entry point on the handlers:
//! - first match (`Matcher`, used by `await_all_expected_report_matches`):
//!   every matcher must be satisfied by at least one report, in any order;
//! - settle to final value (`FinalValue`, used by `await_all_final_values_reported`):
//!   only the most recent report on a path counts;
//! - ordered sequence (used by `await_sequence_of_reports`): see `SequenceTracker`.

use core::fmt;

use super::path::{AttrPath, ClusterId, EventId, ReportPath};
use super::report::Report;
use super::value::Value;

/// A predicate over reports.
///
/// A single report may satisfy several matchers at once.
#[derive(Clone)]
pub enum Matcher {
    /// Any report on the given path
    Path(ReportPath),
    /// An attribute report carrying exactly `value`
    Value { path: AttrPath, value: Value },
    /// A list attribute report containing `element`
    Contains { path: AttrPath, element: Value },
    /// A list attribute report containing a structure which carries all of `fields`
    /// (context tag and value); members not listed are not compared
    ContainsFields {
        path: AttrPath,
        fields: Vec<(u8, Value)>,
    },
    /// An event report of the given type, on any endpoint
    Event { cluster: ClusterId, event: EventId },
    /// An attribute report whose value satisfies `check`
    Predicate {
        description: &'static str,
        path: AttrPath,
        check: fn(&Value) -> bool,
    },
}

impl Matcher {
    pub fn matches(&self, report: &Report) -> bool {
        match self {
            Self::Path(path) => report.path == *path,
            Self::Value { path, value } => {
                report.attr_path() == Some(path) && report.value == *value
            }
            Self::Contains { path, element } => {
                report.attr_path() == Some(path) && report.value.contains(element)
            }
            Self::ContainsFields { path, fields } => {
                report.attr_path() == Some(path) && report.value.contains_fields(fields)
            }
            Self::Event { cluster, event } => report
                .event_path()
                .map(|p| p.cluster == *cluster && p.event == *event)
                .unwrap_or(false),
            Self::Predicate { path, check, .. } => {
                report.attr_path() == Some(path) && check(&report.value)
            }
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "any report on {path}"),
            Self::Value { path, value } => write!(f, "{path} == {value}"),
            Self::Contains { path, element } => write!(f, "{path} contains {element}"),
            Self::ContainsFields { path, fields } => {
                write!(f, "{path} contains element with {}", Value::Struct(fields.clone()))
            }
            Self::Event { cluster, event } => {
                write!(f, "event 0x{event:04x} of cluster 0x{cluster:04x}")
            }
            Self::Predicate {
                description, path, ..
            } => write!(f, "{path}: {description}"),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({self})")
    }
}

/// Return the matchers not satisfied by any of `reports`.
pub fn unmatched<'a>(matchers: &'a [Matcher], reports: &[Report]) -> Vec<&'a Matcher> {
    matchers
        .iter()
        .filter(|matcher| !reports.iter().any(|report| matcher.matches(report)))
        .collect()
}

/// The value an attribute is expected to settle to.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalValue {
    pub path: AttrPath,
    pub value: Value,
}

impl FinalValue {
    pub fn new(path: AttrPath, value: impl Into<Value>) -> Self {
        Self {
            path,
            value: value.into(),
        }
    }

    /// The most recent value reported for this path, if any.
    pub fn last_reported<'a>(&self, reports: &'a [Report]) -> Option<&'a Value> {
        reports
            .iter()
            .rev()
            .find(|report| report.attr_path() == Some(&self.path))
            .map(|report| &report.value)
    }

    pub fn is_settled(&self, reports: &[Report]) -> bool {
        self.last_reported(reports) == Some(&self.value)
    }
}

impl fmt::Display for FinalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.path, self.value)
    }
}

/// Outcome of feeding one value to a `SequenceTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStep {
    /// The value was the next expected one
    Advanced,
    /// The value repeated the previously matched element
    Duplicate,
    /// The value was out of order
    Mismatch,
    /// The whole sequence has been observed
    Complete,
}

/// Tracks progress through an expected, strictly ordered sequence of values.
///
/// A value equal to the element matched last is tolerated as a duplicate
/// (subscriptions may re-report an unchanged value); any other value which
/// is not the next expected one is a mismatch.
#[derive(Debug, Clone)]
pub struct SequenceTracker<'a> {
    expected: &'a [Value],
    next: usize,
    seen: Vec<Value>,
}

impl<'a> SequenceTracker<'a> {
    pub fn new(expected: &'a [Value]) -> Self {
        Self {
            expected,
            next: 0,
            seen: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.expected.len()
    }

    pub fn expected_next(&self) -> Option<&Value> {
        self.expected.get(self.next)
    }

    /// All values fed so far, in arrival order.
    pub fn seen(&self) -> &[Value] {
        &self.seen
    }

    pub fn feed(&mut self, value: &Value) -> SequenceStep {
        self.seen.push(value.clone());

        if self.expected_next() == Some(value) {
            self.next += 1;

            if self.is_complete() {
                SequenceStep::Complete
            } else {
                SequenceStep::Advanced
            }
        } else if self.next > 0 && self.expected[self.next - 1] == *value {
            SequenceStep::Duplicate
        } else {
            SequenceStep::Mismatch
        }
    }
}
