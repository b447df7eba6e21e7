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

use core::fmt;

use std::time::{Instant, SystemTime};

use super::path::{AttrPath, EventPath, ReportPath};
use super::value::Value;

/// Priority of a reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Debug = 0,
    Info = 1,
    Critical = 2,
}

/// Event-specific metadata of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub event_number: u64,
    pub priority: EventPriority,
}

/// A single attribute or event report, as observed by a subscription handler.
///
/// Reports are immutable once recorded; the `seq` number is assigned by the
/// accumulator and is strictly increasing in arrival order.
#[derive(Debug, Clone)]
pub struct Report {
    pub seq: u64,
    pub path: ReportPath,
    pub value: Value,
    pub event: Option<EventHeader>,
    pub received_at: Instant,
    pub timestamp_utc: SystemTime,
}

impl Report {
    pub fn attr_path(&self) -> Option<&AttrPath> {
        self.path.attr()
    }

    pub fn event_path(&self) -> Option<&EventPath> {
        self.path.event()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} = {}", self.seq, self.path, self.value)?;

        if let Some(header) = &self.event {
            write!(
                f,
                " (event no {}, {:?})",
                header.event_number, header.priority
            )?;
        }

        Ok(())
    }
}
