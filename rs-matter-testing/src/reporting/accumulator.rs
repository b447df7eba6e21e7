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

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};

use crate::error::{Error, ErrorCode};

use super::matcher::{unmatched, FinalValue, Matcher, SequenceStep, SequenceTracker};
use super::path::{AttrPath, ReportFilter, ReportPath};
use super::report::{EventHeader, Report};
use super::value::Value;

/// The state guarded by the accumulator lock.
pub(crate) struct Reports {
    filter: ReportFilter,
    next_seq: u64,
    /// Reports not yet consumed by a `wait_for_*` call, in arrival order
    queue: VecDeque<Report>,
    /// All reports accepted since the last reset, in arrival order
    history: Vec<Report>,
}

impl Reports {
    const fn new(filter: ReportFilter) -> Self {
        Self {
            filter,
            next_seq: 0,
            queue: VecDeque::new(),
            history: Vec::new(),
        }
    }

    fn take_first<F>(&mut self, mut f: F) -> Option<Report>
    where
        F: FnMut(&Report) -> bool,
    {
        let pos = self.queue.iter().position(|report| f(report))?;

        self.queue.remove(pos)
    }

    fn describe_queue(&self) -> String {
        describe(self.queue.iter())
    }

    fn describe_history(&self) -> String {
        describe(self.history.iter())
    }
}

fn describe<'a>(reports: impl Iterator<Item = &'a Report>) -> String {
    let reports = reports.map(ToString::to_string).collect::<Vec<_>>();

    if reports.is_empty() {
        "no reports".to_string()
    } else {
        format!("[{}]", reports.join(", "))
    }
}

/// The instant `timeout` from now, or `None` if that is too far out to represent,
/// in which case the wait is unbounded.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// The time left until `deadline`; `Duration::MAX` if there is none.
pub(crate) fn remaining(deadline: Option<Instant>) -> Duration {
    deadline
        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        .unwrap_or(Duration::MAX)
}

/// A thread-safe, ordered buffer of subscription reports.
///
/// Reports are pushed by the transport's callback context through a `ReportSink`
/// and consumed by the test thread via the blocking `wait_*` / `await_*` methods.
/// Every access (append, reset, scan, consume) happens under one mutex, and waiters
/// are woken through one condition variable on every append.
///
/// Two views over the reports are kept:
/// - a queue of not-yet-consumed reports, which the `wait_for_*` methods pop from;
/// - the full history since the last reset, which the `await_*` methods scan
///   without consuming.
pub struct ReportAccumulator {
    reports: Mutex<Reports>,
    condvar: Condvar,
}

impl ReportAccumulator {
    pub const fn new(filter: ReportFilter) -> Self {
        Self {
            reports: Mutex::new(Reports::new(filter)),
            condvar: Condvar::new(),
        }
    }

    pub fn filter(&self) -> Result<ReportFilter, Error> {
        Ok(self.lock()?.filter)
    }

    pub(crate) fn set_filter(&self, filter: ReportFilter) -> Result<(), Error> {
        self.lock()?.filter = filter;

        Ok(())
    }

    /// Record a report, unless it is rejected by the filter.
    ///
    /// Returns `true` if the report was accepted.
    pub fn push(
        &self,
        path: ReportPath,
        value: Value,
        event: Option<EventHeader>,
    ) -> Result<bool, Error> {
        let mut reports = self.lock()?;

        if !reports.filter.matches(&path) {
            debug!("Ignoring report for {path}: outside of the subscription filter");
            return Ok(false);
        }

        let report = Report {
            seq: reports.next_seq,
            path,
            value,
            event,
            received_at: Instant::now(),
            timestamp_utc: SystemTime::now(),
        };

        info!("[callback] Report {report}");

        reports.next_seq += 1;
        reports.queue.push_back(report.clone());
        reports.history.push(report);

        drop(reports);

        self.condvar.notify_all();

        Ok(true)
    }

    /// Discard all reports received so far.
    ///
    /// Used to drop the priming reports of a freshly established subscription so that
    /// they are not mistaken for reports triggered by the test. Sequence numbers keep
    /// increasing across resets.
    pub fn reset(&self) -> Result<(), Error> {
        let mut reports = self.lock()?;

        debug!(
            "Resetting accumulator: dropping {} queued and {} recorded reports",
            reports.queue.len(),
            reports.history.len()
        );

        reports.queue.clear();
        reports.history.clear();

        Ok(())
    }

    /// A snapshot of all reports since the last reset, in arrival order.
    pub fn reports(&self) -> Result<Vec<Report>, Error> {
        Ok(self.lock()?.history.clone())
    }

    /// The number of reports since the last reset.
    pub fn report_count(&self) -> Result<usize, Error> {
        Ok(self.lock()?.history.len())
    }

    /// The number of reports not yet consumed by a `wait_for_*` call.
    pub fn pending_count(&self) -> Result<usize, Error> {
        Ok(self.lock()?.queue.len())
    }

    /// The most recent report since the last reset.
    pub fn last_report(&self) -> Result<Option<Report>, Error> {
        Ok(self.lock()?.history.last().cloned())
    }

    /// Block until the oldest unconsumed report satisfying `f` is available, consume
    /// and return it.
    ///
    /// Non-matching reports stay queued for other waiters.
    pub fn wait_for_report<F>(&self, timeout: Duration, mut f: F) -> Result<Report, Error>
    where
        F: FnMut(&Report) -> bool,
    {
        let start = Instant::now();

        self.wait(timeout, |reports| reports.take_first(&mut f))?
            .ok_or_else(|| {
                let queued = self
                    .lock()
                    .map(|reports| reports.describe_queue())
                    .unwrap_or_default();

                Error::new_with_context(
                    ErrorCode::Timeout,
                    format!(
                        "no matching report within {:.1}s (waited {:.1}s); unconsumed: {queued}",
                        timeout.as_secs_f32(),
                        start.elapsed().as_secs_f32()
                    ),
                )
            })
    }

    /// Consume reports until one satisfies `f`, discarding the ones which don't.
    ///
    /// The remaining time is recomputed after each discarded report, so the call
    /// never exceeds `timeout` in total.
    pub fn wait_for_report_matching<F>(&self, timeout: Duration, mut f: F) -> Result<Report, Error>
    where
        F: FnMut(&Report) -> bool,
    {
        let deadline = deadline_after(timeout);
        let mut discarded = Vec::new();

        loop {
            let report = self.wait_for_report(remaining(deadline), |_| true).map_err(|e| {
                e.with_context(format!(
                    "discarded before time-out: {}",
                    describe(discarded.iter())
                ))
            })?;

            if f(&report) {
                return Ok(report);
            }

            debug!("Discarding non-matching report {report}");
            discarded.push(report);
        }
    }

    /// Succeed only if no report at all arrives within `timeout`.
    pub fn expect_no_report(&self, timeout: Duration) -> Result<(), Error> {
        match self.wait(timeout, |reports| reports.queue.pop_front())? {
            None => Ok(()),
            Some(report) => Err(Error::new_with_context(
                ErrorCode::UnexpectedReport,
                format!("received unexpected report {report}"),
            )),
        }
    }

    /// Block until each matcher is satisfied by at least one report since the last reset.
    ///
    /// Reports are not consumed, and the matchers may be satisfied in any order.
    /// A single report may satisfy several matchers.
    pub fn await_all_expected_report_matches(
        &self,
        matchers: &[Matcher],
        timeout: Duration,
    ) -> Result<(), Error> {
        for matcher in matchers {
            info!("--> Expecting report matching: {matcher}");
        }

        let done = self.wait(timeout, |reports| {
            unmatched(matchers, &reports.history).is_empty().then_some(())
        })?;

        if done.is_some() {
            info!("All {} expected report matches found", matchers.len());
            return Ok(());
        }

        let reports = self.lock()?;
        let missing = unmatched(matchers, &reports.history)
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        for matcher in &missing {
            warn!("Did not find a report matching: {matcher}");
        }

        Err(Error::new_with_context(
            ErrorCode::Timeout,
            format!(
                "did not find all expected report matches within {:.1}s; missing [{}]; seen {}",
                timeout.as_secs_f32(),
                missing.join(", "),
                reports.describe_history()
            ),
        ))
    }

    /// Block until, for every expected entry, the most recent report on its path carries
    /// the expected value.
    ///
    /// Intermediate values are ignored; only the last reported one counts.
    pub fn await_all_final_values_reported(
        &self,
        expected: &[FinalValue],
        timeout: Duration,
    ) -> Result<(), Error> {
        for element in expected {
            info!("--> Expecting final value {element}");
        }

        let done = self.wait(timeout, |reports| {
            expected
                .iter()
                .all(|element| element.is_settled(&reports.history))
                .then_some(())
        })?;

        if done.is_some() {
            info!("All {} expected final values reported", expected.len());
            return Ok(());
        }

        let reports = self.lock()?;
        let mismatches = expected
            .iter()
            .filter(|element| !element.is_settled(&reports.history))
            .map(|element| {
                let last = element
                    .last_reported(&reports.history)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "nothing".to_string());

                warn!("Expected final value {element}, last reported {last}");

                format!("{element} (last reported {last})")
            })
            .collect::<Vec<_>>();

        Err(Error::new_with_context(
            ErrorCode::Timeout,
            format!(
                "did not find all expected last report values within {:.1}s: {}",
                timeout.as_secs_f32(),
                mismatches.join(", ")
            ),
        ))
    }

    /// Consume the reports for the attribute at `path` in arrival order, and check that their
    /// values follow `sequence` exactly.
    ///
    /// Reports for other paths (including the same attribute on another endpoint)
    /// are consumed and skipped. A repetition of the last
    /// matched value is tolerated; any other out-of-order value fails immediately with
    /// `ErrorCode::SequenceMismatch`.
    pub fn await_sequence_of_reports(
        &self,
        path: AttrPath,
        sequence: &[Value],
        timeout: Duration,
    ) -> Result<(), Error> {
        if sequence.is_empty() {
            return Ok(());
        }

        let deadline = deadline_after(timeout);
        let mut tracker = SequenceTracker::new(sequence);

        loop {
            if let Some(expected) = tracker.expected_next() {
                info!("Expecting value {expected} for {path}");
            }

            let report = self.wait(remaining(deadline), |reports| reports.queue.pop_front())?;

            let Some(report) = report else {
                return Err(Error::new_with_context(
                    ErrorCode::Timeout,
                    format!(
                        "did not get full sequence {} within {:.1}s; got {} before time-out",
                        describe_values(sequence),
                        timeout.as_secs_f32(),
                        describe_values(tracker.seen())
                    ),
                ));
            };

            if report.attr_path() != Some(&path) {
                continue;
            }

            match tracker.feed(&report.value) {
                SequenceStep::Complete => {
                    info!(
                        "Got full sequence {} for {path}",
                        describe_values(sequence)
                    );
                    return Ok(());
                }
                SequenceStep::Advanced => {
                    info!("Got expected attribute change {report}");
                }
                SequenceStep::Duplicate => {
                    debug!("Tolerating repeated value {report}");
                }
                SequenceStep::Mismatch => {
                    return Err(Error::new_with_context(
                        ErrorCode::SequenceMismatch,
                        format!(
                            "value {} out of order; expected sequence {}, got {}",
                            report.value,
                            describe_values(sequence),
                            describe_values(tracker.seen())
                        ),
                    ));
                }
            }
        }
    }

    /// Wait until `f` returns `Some`, or `timeout` elapses (in which case `None` is returned).
    ///
    /// `f` is evaluated under the lock, first immediately and then on every append.
    pub(crate) fn wait<F, R>(&self, timeout: Duration, mut f: F) -> Result<Option<R>, Error>
    where
        F: FnMut(&mut Reports) -> Option<R>,
    {
        let deadline = deadline_after(timeout);
        let mut reports = self.lock()?;

        loop {
            if let Some(result) = f(&mut reports) {
                return Ok(Some(result));
            }

            reports = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }

                    self.condvar.wait_timeout(reports, deadline - now)?.0
                }
                None => self.condvar.wait(reports)?,
            };
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Reports>, Error> {
        Ok(self.reports.lock()?)
    }
}

fn describe_values(values: &[Value]) -> String {
    format!(
        "[{}]",
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// The callback object handed over to the subscription transport.
///
/// Cloning is cheap; all clones feed the same accumulator.
#[derive(Clone)]
pub struct ReportSink(Arc<ReportAccumulator>);

impl ReportSink {
    pub(crate) fn new(accumulator: Arc<ReportAccumulator>) -> Self {
        Self(accumulator)
    }

    /// Deliver an attribute value update.
    pub fn report_attribute(
        &self,
        path: AttrPath,
        value: impl Into<Value>,
    ) -> Result<bool, Error> {
        self.0.push(path.into(), value.into(), None)
    }

    /// Deliver an event.
    pub fn report_event(
        &self,
        path: super::path::EventPath,
        header: EventHeader,
        value: impl Into<Value>,
    ) -> Result<bool, Error> {
        self.0.push(path.into(), value.into(), Some(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABEL: AttrPath = AttrPath::new(0, 0x0028, 0x0005);

    #[test]
    fn test_filter_rejects_reports() {
        let acc = ReportAccumulator::new(ReportFilter::leaf(0x0028, 0x0005));

        assert!(acc.push(LABEL.into(), "a".into(), None).unwrap());
        assert!(!acc
            .push(AttrPath::new(0, 0x0028, 0x0001).into(), 1u8.into(), None)
            .unwrap());

        assert_eq!(acc.report_count().unwrap(), 1);
        assert_eq!(acc.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_sequence_numbers_survive_reset() {
        let acc = ReportAccumulator::new(ReportFilter::default());

        acc.push(LABEL.into(), "a".into(), None).unwrap();
        acc.reset().unwrap();
        acc.push(LABEL.into(), "b".into(), None).unwrap();

        let last = acc.last_report().unwrap().unwrap();
        assert_eq!(last.seq, 1);
        assert_eq!(last.value, Value::from("b"));
    }

    #[test]
    fn test_wait_returns_immediately_when_available() {
        let acc = ReportAccumulator::new(ReportFilter::default());
        acc.push(LABEL.into(), "a".into(), None).unwrap();

        let report = acc.wait_for_report(Duration::ZERO, |_| true).unwrap();
        assert_eq!(report.value, Value::from("a"));

        let err = acc.wait_for_report(Duration::ZERO, |_| true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_unbounded_timeouts() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert_eq!(remaining(None), Duration::MAX);

        let acc = ReportAccumulator::new(ReportFilter::default());
        acc.push(LABEL.into(), "a".into(), None).unwrap();
        acc.push(LABEL.into(), "b".into(), None).unwrap();
        acc.push(LABEL.into(), "c".into(), None).unwrap();

        let report = acc.wait_for_report(Duration::MAX, |_| true).unwrap();
        assert_eq!(report.value, Value::from("a"));

        let report = acc
            .wait_for_report_matching(Duration::MAX, |report| report.value == Value::from("b"))
            .unwrap();
        assert_eq!(report.seq, 1);

        acc.await_sequence_of_reports(LABEL, &["c".into()], Duration::MAX)
            .unwrap();
    }
}
