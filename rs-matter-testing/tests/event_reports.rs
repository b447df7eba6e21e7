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

use std::time::Duration;

use rs_matter_testing::error::ErrorCode;
use rs_matter_testing::reporting::{
    EventPath, EventPriority, EventSubscriptionHandler, Matcher, SubscribeParams,
    SubscribeTarget, Value,
};

use common::{feed_later, init_env_logger, Feed, FakeTransport};

mod common;

const NODE_ID: u64 = 0x12344321;

const BOOLEAN_STATE_CLUSTER: u32 = 0x0045;
const STATE_CHANGE: EventPath = EventPath::new(1, BOOLEAN_STATE_CLUSTER, 0x0000);

const SWITCH_CLUSTER: u32 = 0x003b;
const INITIAL_PRESS: EventPath = EventPath::new(1, SWITCH_CLUSTER, 0x0001);
const SHORT_RELEASE: EventPath = EventPath::new(1, SWITCH_CLUSTER, 0x0003);

const SHORT: Duration = Duration::from_millis(100);
const LONG: Duration = Duration::from_secs(5);

fn started(transport: &FakeTransport, cluster: u32) -> EventSubscriptionHandler {
    let mut handler = EventSubscriptionHandler::new(cluster);

    handler
        .start(
            transport,
            NODE_ID,
            Some(1),
            SubscribeParams::new(0, 30).keep_subscriptions(false),
        )
        .unwrap();

    handler
}

fn position(value: u8) -> Value {
    Value::Struct(vec![(0, value.into())])
}

#[test]
fn test_event_subscriptions_keep_existing_ones() {
    init_env_logger();

    let transport = FakeTransport::new();
    let _handler = started(&transport, BOOLEAN_STATE_CLUSTER);

    let request = transport.last_request();
    assert!(request.params.keep_subscriptions);
    assert_eq!(
        request.target,
        SubscribeTarget::Events {
            cluster: BOOLEAN_STATE_CLUSTER,
            urgent: true
        }
    );

    let mut non_urgent = EventSubscriptionHandler::new(SWITCH_CLUSTER).non_urgent();
    non_urgent
        .start(&transport, NODE_ID, None, SubscribeParams::default())
        .unwrap();

    assert_eq!(
        transport.last_request().target,
        SubscribeTarget::Events {
            cluster: SWITCH_CLUSTER,
            urgent: false
        }
    );
}

#[test]
fn test_wait_for_event_report() {
    init_env_logger();

    let transport = FakeTransport::new();
    let handler = started(&transport, SWITCH_CLUSTER);

    let feeder = feed_later(
        transport.sink(),
        vec![
            Feed::Pause(Duration::from_millis(20)),
            Feed::event(INITIAL_PRESS, 10, position(1)),
            Feed::event(SHORT_RELEASE, 11, position(1)),
        ],
    );

    // The release is waited for first; the press stays queued
    let release = handler.wait_for_event_report(SHORT_RELEASE.event, LONG).unwrap();
    assert_eq!(release.field(0), Some(&Value::UInt(1)));

    let press = handler.wait_for_event(INITIAL_PRESS.event, LONG).unwrap();
    let header = press.event.unwrap();
    assert_eq!(header.event_number, 10);
    assert_eq!(header.priority, EventPriority::Info);

    feeder.join().unwrap();

    let err = handler
        .wait_for_event_report(INITIAL_PRESS.event, SHORT)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);

    assert_eq!(handler.last_event().unwrap().unwrap().event_path(), Some(&SHORT_RELEASE));
    assert_eq!(handler.reports().unwrap().len(), 2);
}

#[test]
fn test_expect_no_event() {
    init_env_logger();

    let transport = FakeTransport::new();
    let handler = started(&transport, BOOLEAN_STATE_CLUSTER);

    handler.wait_for_event_expect_no_report(SHORT).unwrap();

    let feeder = feed_later(
        transport.sink(),
        vec![
            Feed::Pause(Duration::from_millis(20)),
            Feed::event(STATE_CHANGE, 1, Value::Struct(vec![(0, true.into())])),
        ],
    );

    let err = handler.wait_for_event_expect_no_report(LONG).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnexpectedReport);

    feeder.join().unwrap();
}

#[test]
fn test_event_matchers() {
    init_env_logger();

    let transport = FakeTransport::with_priming(vec![Feed::event(STATE_CHANGE, 1, Value::Null)]);
    let handler = started(&transport, BOOLEAN_STATE_CLUSTER);

    handler
        .await_all_expected_report_matches(
            &[
                Matcher::Event {
                    cluster: BOOLEAN_STATE_CLUSTER,
                    event: STATE_CHANGE.event,
                },
                Matcher::Path(STATE_CHANGE.into()),
            ],
            SHORT,
        )
        .unwrap();

    handler.reset().unwrap();

    let err = handler
        .await_all_expected_report_matches(
            &[Matcher::Event {
                cluster: BOOLEAN_STATE_CLUSTER,
                event: STATE_CHANGE.event,
            }],
            SHORT,
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);
}
