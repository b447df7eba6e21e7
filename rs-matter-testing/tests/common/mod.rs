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

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rs_matter_testing::error::{Error, ErrorCode};
use rs_matter_testing::linux::CommandRunner;
use rs_matter_testing::reporting::{
    AttrPath, EventHeader, EventPath, EventPriority, ReportSink, SubscribeRequest, Subscription,
    SubscriptionTransport, Value,
};

pub fn init_env_logger() {
    let _ = env_logger::try_init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
}

/// One step of a scripted report stream.
#[derive(Debug, Clone)]
pub enum Feed {
    Attr(AttrPath, Value),
    Event(EventPath, u64, Value),
    Pause(Duration),
}

impl Feed {
    pub fn attr(path: AttrPath, value: impl Into<Value>) -> Self {
        Self::Attr(path, value.into())
    }

    pub fn event(path: EventPath, event_number: u64, value: impl Into<Value>) -> Self {
        Self::Event(path, event_number, value.into())
    }

    fn deliver(&self, sink: &ReportSink) {
        match self {
            Self::Attr(path, value) => {
                sink.report_attribute(*path, value.clone()).unwrap();
            }
            Self::Event(path, event_number, value) => {
                let header = EventHeader {
                    event_number: *event_number,
                    priority: EventPriority::Info,
                };

                sink.report_event(*path, header, value.clone()).unwrap();
            }
            Self::Pause(duration) => thread::sleep(*duration),
        }
    }
}

/// Deliver `feeds` to `sink` from another thread, as a transport would.
pub fn feed_later(sink: ReportSink, feeds: Vec<Feed>) -> JoinHandle<()> {
    thread::spawn(move || {
        for feed in &feeds {
            feed.deliver(&sink);
        }
    })
}

pub struct FakeSubscription {
    id: u32,
    shutdowns: Arc<AtomicUsize>,
    shut: bool,
}

impl Subscription for FakeSubscription {
    fn subscription_id(&self) -> u32 {
        self.id
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        if !self.shut {
            self.shut = true;
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }
}

/// A transport delivering `priming` reports synchronously on subscribe, and
/// keeping the sinks around for the test to feed.
#[derive(Default)]
pub struct FakeTransport {
    pub priming: Vec<Feed>,
    pub fail_with: Option<ErrorCode>,
    pub requests: Mutex<Vec<SubscribeRequest>>,
    pub sinks: Mutex<Vec<ReportSink>>,
    pub shutdowns: Arc<AtomicUsize>,
    next_id: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priming(priming: Vec<Feed>) -> Self {
        Self {
            priming,
            ..Default::default()
        }
    }

    pub fn failing(code: ErrorCode) -> Self {
        Self {
            fail_with: Some(code),
            ..Default::default()
        }
    }

    pub fn sink(&self) -> ReportSink {
        self.sinks.lock().unwrap().last().cloned().unwrap()
    }

    pub fn last_request(&self) -> SubscribeRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl SubscriptionTransport for FakeTransport {
    fn subscribe(
        &self,
        request: &SubscribeRequest,
        sink: ReportSink,
    ) -> Result<Box<dyn Subscription>, Error> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(code) = self.fail_with {
            return Err(Error::new_with_context(code, "subscription refused"));
        }

        for feed in &self.priming {
            feed.deliver(&sink);
        }

        self.sinks.lock().unwrap().push(sink);

        Ok(Box::new(FakeSubscription {
            id: 0x100 + self.next_id.fetch_add(1, Ordering::SeqCst),
            shutdowns: self.shutdowns.clone(),
            shut: false,
        }))
    }
}

/// A command runner recording the command lines instead of running them.
///
/// It keeps track of `ip netns add/del` so that `ip netns list` reflects the
/// namespaces a test has left behind.
#[derive(Default)]
pub struct RecordingRunner {
    /// Commands containing any of these fragments fail
    pub fail_on: Vec<String>,
    /// Canned outputs, by command fragment
    pub outputs: Vec<(String, String)>,
    commands: Mutex<Vec<String>>,
    namespaces: Mutex<BTreeSet<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(fragment: &str) -> Self {
        Self {
            fail_on: vec![fragment.to_string()],
            ..Default::default()
        }
    }

    pub fn with_output(mut self, fragment: &str, output: &str) -> Self {
        self.outputs.push((fragment.to_string(), output.to_string()));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().iter().cloned().collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn output(&self, args: &[&str]) -> Result<String, Error> {
        let line = args.join(" ");
        self.commands.lock().unwrap().push(line.clone());

        if self.fail_on.iter().any(|fragment| line.contains(fragment.as_str())) {
            return Err(Error::new_with_context(
                ErrorCode::CommandFailed,
                format!("`{line}` failed with exit status: 1"),
            ));
        }

        match args {
            ["ip", "netns", "add", netns] => {
                self.namespaces.lock().unwrap().insert(netns.to_string());
            }
            ["ip", "netns", "del", netns] => {
                if !self.namespaces.lock().unwrap().remove(*netns) {
                    return Err(Error::new_with_context(
                        ErrorCode::CommandFailed,
                        format!("Cannot remove namespace file \"/run/netns/{netns}\""),
                    ));
                }
            }
            ["ip", "netns", "list"] => {
                return Ok(self
                    .namespaces()
                    .iter()
                    .map(|netns| format!("{netns} (id: 0)\n"))
                    .collect());
            }
            _ => (),
        }

        Ok(self
            .outputs
            .iter()
            .find(|(fragment, _)| line.contains(fragment.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}
