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

//! Attribute and event subscription handlers, as used by the test cases.
//!
//! A typical test step looks like:
//! - `start` the handler against the DUT;
//! - `reset` it to drop the priming reports;
//! - trigger a change on the DUT;
//! - block on one of the `wait_for_*` / `await_*` methods.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, ErrorCode};

use super::accumulator::{ReportAccumulator, ReportSink};
use super::matcher::{FinalValue, Matcher};
use super::path::{AttrId, AttrPath, ClusterId, EndptId, EventId, ReportFilter};
use super::report::Report;
use super::transport::{
    SubscribeParams, SubscribeRequest, SubscribeTarget, Subscription, SubscriptionTransport,
};
use super::value::Value;

/// The transport-side half of a handler: the live subscription, if any.
struct Slot {
    accumulator: Arc<ReportAccumulator>,
    subscription: Option<Box<dyn Subscription>>,
}

impl Slot {
    fn new(filter: ReportFilter) -> Self {
        Self {
            accumulator: Arc::new(ReportAccumulator::new(filter)),
            subscription: None,
        }
    }

    fn start<T>(
        &mut self,
        transport: T,
        node_id: u64,
        endpoint: Option<EndptId>,
        target: SubscribeTarget,
        params: SubscribeParams,
    ) -> Result<u32, Error>
    where
        T: SubscriptionTransport,
    {
        if self.subscription.is_some() {
            return Err(Error::new_with_context(
                ErrorCode::InvalidState,
                "subscription already started",
            ));
        }

        params.validate()?;

        let previous = self.accumulator.filter()?;
        self.accumulator.set_filter(ReportFilter {
            endpoint,
            ..previous
        })?;

        let request = SubscribeRequest {
            node_id,
            endpoint,
            target,
            params,
        };

        info!("Subscribing to node {node_id:#x}: {request:?}");

        let subscription =
            match transport.subscribe(&request, ReportSink::new(self.accumulator.clone())) {
                Ok(subscription) => subscription,
                Err(err) => {
                    self.accumulator.set_filter(previous)?;
                    return Err(err);
                }
            };

        let id = subscription.subscription_id();
        info!("Subscription {id:#x} established");

        self.subscription = Some(subscription);

        Ok(id)
    }

    fn subscription_id(&self) -> Option<u32> {
        self.subscription.as_ref().map(|s| s.subscription_id())
    }

    fn cancel(&mut self) -> Result<(), Error> {
        if let Some(mut subscription) = self.subscription.take() {
            info!(
                "Shutting down subscription {:#x}",
                subscription.subscription_id()
            );

            subscription.shutdown()?;
        }

        Ok(())
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Err(e) = self.cancel() {
            warn!("Failed to shut down subscription: {e}");
        }
    }
}

/// Accumulates the attribute reports of one cluster (or one of its attributes).
pub struct AttributeSubscriptionHandler {
    cluster: ClusterId,
    attr: Option<AttrId>,
    slot: Slot,
}

impl AttributeSubscriptionHandler {
    /// Create a handler expecting reports for `attr` of `cluster`,
    /// or for all attributes of `cluster` if `attr` is `None`.
    pub fn new(cluster: ClusterId, attr: Option<AttrId>) -> Self {
        let filter = match attr {
            Some(attr) => ReportFilter::leaf(cluster, attr),
            None => ReportFilter::cluster(cluster),
        };

        Self {
            cluster,
            attr,
            slot: Slot::new(filter),
        }
    }

    /// Subscribe to the expected attributes on the DUT.
    ///
    /// Reports start accumulating immediately, including the priming ones.
    /// Transport errors are returned unchanged.
    pub fn start<T>(
        &mut self,
        transport: T,
        node_id: u64,
        endpoint: Option<EndptId>,
        params: SubscribeParams,
    ) -> Result<u32, Error>
    where
        T: SubscriptionTransport,
    {
        self.slot.start(
            transport,
            node_id,
            endpoint,
            SubscribeTarget::Attributes {
                cluster: self.cluster,
                attr: self.attr,
            },
            params,
        )
    }

    pub fn subscription_id(&self) -> Option<u32> {
        self.slot.subscription_id()
    }

    /// A sink feeding this handler, for transports driven outside of `start`.
    pub fn sink(&self) -> ReportSink {
        ReportSink::new(self.slot.accumulator.clone())
    }

    pub fn accumulator(&self) -> &ReportAccumulator {
        &self.slot.accumulator
    }

    /// Drop all reports received so far; the subscription stays live.
    pub fn reset(&self) -> Result<(), Error> {
        self.slot.accumulator.reset()
    }

    /// Shut down the subscription. Also done when the handler is dropped.
    pub fn cancel(&mut self) -> Result<(), Error> {
        self.slot.cancel()
    }

    /// Wait for the oldest not yet consumed attribute report.
    pub fn wait_for_attribute_report(&self, timeout: Duration) -> Result<Report, Error> {
        self.slot
            .accumulator
            .wait_for_report(timeout, |report| report.attr_path().is_some())
            .map_err(|e| e.with_context(format!("attribute report for {}", self.describe())))
    }

    /// Consume attribute reports until one satisfies `f`.
    pub fn wait_for_attribute_report_matching<F>(
        &self,
        timeout: Duration,
        mut f: F,
    ) -> Result<Report, Error>
    where
        F: FnMut(&Report) -> bool,
    {
        self.slot
            .accumulator
            .wait_for_report_matching(timeout, |report| {
                report.attr_path().is_some() && f(report)
            })
            .map_err(|e| e.with_context(format!("attribute report for {}", self.describe())))
    }

    pub fn await_all_expected_report_matches(
        &self,
        matchers: &[Matcher],
        timeout: Duration,
    ) -> Result<(), Error> {
        self.slot
            .accumulator
            .await_all_expected_report_matches(matchers, timeout)
    }

    pub fn await_all_final_values_reported(
        &self,
        expected: &[FinalValue],
        timeout: Duration,
    ) -> Result<(), Error> {
        self.slot
            .accumulator
            .await_all_final_values_reported(expected, timeout)
    }

    pub fn await_sequence_of_reports(
        &self,
        path: AttrPath,
        sequence: &[Value],
        timeout: Duration,
    ) -> Result<(), Error> {
        self.slot
            .accumulator
            .await_sequence_of_reports(path, sequence, timeout)
    }

    pub fn last_report(&self) -> Result<Option<Report>, Error> {
        self.slot.accumulator.last_report()
    }

    pub fn reports(&self) -> Result<Vec<Report>, Error> {
        self.slot.accumulator.reports()
    }

    pub fn report_count(&self) -> Result<usize, Error> {
        self.slot.accumulator.report_count()
    }

    fn describe(&self) -> String {
        match self.attr {
            Some(attr) => format!("cluster 0x{:04x}/attr 0x{attr:04x}", self.cluster),
            None => format!("cluster 0x{:04x}", self.cluster),
        }
    }
}

/// Accumulates the event reports of one cluster.
pub struct EventSubscriptionHandler {
    cluster: ClusterId,
    urgent: bool,
    slot: Slot,
}

impl EventSubscriptionHandler {
    pub fn new(cluster: ClusterId) -> Self {
        Self {
            cluster,
            urgent: true,
            slot: Slot::new(ReportFilter::cluster(cluster)),
        }
    }

    /// Request the events as non-urgent (urgent is the default).
    pub fn non_urgent(self) -> Self {
        Self {
            urgent: false,
            ..self
        }
    }

    /// Subscribe to the events of the cluster on the DUT.
    ///
    /// Event subscriptions always keep the existing subscriptions of the controller,
    /// whatever `params.keep_subscriptions` says.
    pub fn start<T>(
        &mut self,
        transport: T,
        node_id: u64,
        endpoint: Option<EndptId>,
        params: SubscribeParams,
    ) -> Result<u32, Error>
    where
        T: SubscriptionTransport,
    {
        if !params.keep_subscriptions {
            debug!("Event subscriptions always keep existing subscriptions");
        }

        self.slot.start(
            transport,
            node_id,
            endpoint,
            SubscribeTarget::Events {
                cluster: self.cluster,
                urgent: self.urgent,
            },
            params.keep_subscriptions(true),
        )
    }

    pub fn subscription_id(&self) -> Option<u32> {
        self.slot.subscription_id()
    }

    pub fn sink(&self) -> ReportSink {
        ReportSink::new(self.slot.accumulator.clone())
    }

    pub fn accumulator(&self) -> &ReportAccumulator {
        &self.slot.accumulator
    }

    pub fn reset(&self) -> Result<(), Error> {
        self.slot.accumulator.reset()
    }

    pub fn cancel(&mut self) -> Result<(), Error> {
        self.slot.cancel()
    }

    /// Wait for the oldest not yet consumed event of type `event` and return its payload.
    ///
    /// Events of other types stay queued.
    pub fn wait_for_event_report(&self, event: EventId, timeout: Duration) -> Result<Value, Error> {
        self.wait_for_event(event, timeout).map(|report| report.value)
    }

    /// Like `wait_for_event_report`, but return the whole report, header included.
    pub fn wait_for_event(&self, event: EventId, timeout: Duration) -> Result<Report, Error> {
        self.slot
            .accumulator
            .wait_for_report(timeout, |report| {
                report.event_path().map(|path| path.event) == Some(event)
            })
            .map_err(|e| {
                e.with_context(format!(
                    "event 0x{event:04x} of cluster 0x{:04x}",
                    self.cluster
                ))
            })
    }

    /// Succeed only if no event arrives within `timeout`.
    pub fn wait_for_event_expect_no_report(&self, timeout: Duration) -> Result<(), Error> {
        self.slot.accumulator.expect_no_report(timeout)
    }

    pub fn await_all_expected_report_matches(
        &self,
        matchers: &[Matcher],
        timeout: Duration,
    ) -> Result<(), Error> {
        self.slot
            .accumulator
            .await_all_expected_report_matches(matchers, timeout)
    }

    pub fn last_event(&self) -> Result<Option<Report>, Error> {
        self.slot.accumulator.last_report()
    }

    pub fn reports(&self) -> Result<Vec<Report>, Error> {
        self.slot.accumulator.reports()
    }
}
