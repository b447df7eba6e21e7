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

//! The seam between the subscription handlers and the interaction-model client.
//!
//! Establishing sessions, encoding the Subscribe Request and decoding Report Data
//! messages is the business of the controller implementing `SubscriptionTransport`.

use crate::error::{Error, ErrorCode};

use super::accumulator::ReportSink;
use super::path::{AttrId, ClusterId, EndptId};

/// What a subscription asks the DUT to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeTarget {
    /// The given attribute of `cluster`, or all of its attributes if `attr` is `None`
    Attributes {
        cluster: ClusterId,
        attr: Option<AttrId>,
    },
    /// All events of `cluster`
    Events { cluster: ClusterId, urgent: bool },
}

/// Subscription parameters negotiated with the DUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeParams {
    /// The minimum interval floor, in seconds
    pub min_interval_secs: u16,
    /// The maximum interval ceiling, in seconds
    pub max_interval_secs: u16,
    /// Whether existing subscriptions of this controller on the DUT are kept
    pub keep_subscriptions: bool,
    pub fabric_filtered: bool,
}

impl SubscribeParams {
    pub const fn new(min_interval_secs: u16, max_interval_secs: u16) -> Self {
        Self {
            min_interval_secs,
            max_interval_secs,
            keep_subscriptions: true,
            fabric_filtered: true,
        }
    }

    pub const fn keep_subscriptions(self, keep_subscriptions: bool) -> Self {
        Self {
            keep_subscriptions,
            ..self
        }
    }

    pub const fn fabric_filtered(self, fabric_filtered: bool) -> Self {
        Self {
            fabric_filtered,
            ..self
        }
    }

    /// Reject parameters the DUT is bound to refuse.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_interval_secs > self.max_interval_secs {
            return Err(Error::new_with_context(
                ErrorCode::InvalidArgument,
                format!(
                    "min interval {}s exceeds max interval {}s",
                    self.min_interval_secs, self.max_interval_secs
                ),
            ));
        }

        Ok(())
    }
}

impl Default for SubscribeParams {
    fn default() -> Self {
        Self::new(0, 30)
    }
}

/// A complete subscribe request as issued by a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub node_id: u64,
    /// Restrict the subscription to one endpoint; `None` is a wildcard
    pub endpoint: Option<EndptId>,
    pub target: SubscribeTarget,
    pub params: SubscribeParams,
}

/// A live subscription transaction, owned by the transport.
pub trait Subscription: Send {
    /// The subscription ID assigned by the DUT.
    fn subscription_id(&self) -> u32;

    /// Tear down the subscription. Must be idempotent.
    fn shutdown(&mut self) -> Result<(), Error>;
}

/// An interaction-model client able to establish subscriptions.
///
/// Implementations push every report of the established subscription
/// (priming reports included) into `sink`, from whatever context they
/// receive them on. Errors are returned unchanged to the test.
pub trait SubscriptionTransport {
    fn subscribe(
        &self,
        request: &SubscribeRequest,
        sink: ReportSink,
    ) -> Result<Box<dyn Subscription>, Error>;
}

impl<T> SubscriptionTransport for &T
where
    T: SubscriptionTransport,
{
    fn subscribe(
        &self,
        request: &SubscribeRequest,
        sink: ReportSink,
    ) -> Result<Box<dyn Subscription>, Error> {
        (*self).subscribe(request, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(SubscribeParams::default().validate().is_ok());
        assert!(SubscribeParams::new(5, 5).validate().is_ok());

        let err = SubscribeParams::new(10, 1).validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
