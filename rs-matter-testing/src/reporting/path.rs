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

pub type EndptId = u16;
pub type ClusterId = u32;
pub type AttrId = u32;
pub type EventId = u32;

/// A concrete (non-wildcard) attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrPath {
    pub endpoint: EndptId,
    pub cluster: ClusterId,
    pub attr: AttrId,
}

impl AttrPath {
    pub const fn new(endpoint: EndptId, cluster: ClusterId, attr: AttrId) -> Self {
        Self {
            endpoint,
            cluster,
            attr,
        }
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ep {}/cl 0x{:04x}/attr 0x{:04x}",
            self.endpoint, self.cluster, self.attr
        )
    }
}

/// A concrete (non-wildcard) event path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventPath {
    pub endpoint: EndptId,
    pub cluster: ClusterId,
    pub event: EventId,
}

impl EventPath {
    pub const fn new(endpoint: EndptId, cluster: ClusterId, event: EventId) -> Self {
        Self {
            endpoint,
            cluster,
            event,
        }
    }
}

impl fmt::Display for EventPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ep {}/cl 0x{:04x}/ev 0x{:04x}",
            self.endpoint, self.cluster, self.event
        )
    }
}

/// The source of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportPath {
    Attribute(AttrPath),
    Event(EventPath),
}

impl ReportPath {
    pub const fn endpoint(&self) -> EndptId {
        match self {
            Self::Attribute(path) => path.endpoint,
            Self::Event(path) => path.endpoint,
        }
    }

    pub const fn cluster(&self) -> ClusterId {
        match self {
            Self::Attribute(path) => path.cluster,
            Self::Event(path) => path.cluster,
        }
    }

    pub const fn attr(&self) -> Option<&AttrPath> {
        match self {
            Self::Attribute(path) => Some(path),
            Self::Event(_) => None,
        }
    }

    pub const fn event(&self) -> Option<&EventPath> {
        match self {
            Self::Attribute(_) => None,
            Self::Event(path) => Some(path),
        }
    }
}

impl From<AttrPath> for ReportPath {
    fn from(path: AttrPath) -> Self {
        Self::Attribute(path)
    }
}

impl From<EventPath> for ReportPath {
    fn from(path: EventPath) -> Self {
        Self::Event(path)
    }
}

impl fmt::Display for ReportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(path) => write!(f, "{path}"),
            Self::Event(path) => write!(f, "{path}"),
        }
    }
}

/// The filter a subscription handler applies to incoming reports.
///
/// `None` in any of the fields means "any".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub leaf: Option<u32>,
}

impl ReportFilter {
    /// A filter accepting everything reported for `cluster`.
    pub const fn cluster(cluster: ClusterId) -> Self {
        Self {
            endpoint: None,
            cluster: Some(cluster),
            leaf: None,
        }
    }

    /// A filter accepting a single attribute (or event) of `cluster`.
    pub const fn leaf(cluster: ClusterId, leaf: u32) -> Self {
        Self {
            endpoint: None,
            cluster: Some(cluster),
            leaf: Some(leaf),
        }
    }

    pub const fn on_endpoint(self, endpoint: EndptId) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..self
        }
    }

    pub fn matches(&self, path: &ReportPath) -> bool {
        let leaf = match path {
            ReportPath::Attribute(path) => path.attr,
            ReportPath::Event(path) => path.event,
        };

        self.endpoint.map_or(true, |e| e == path.endpoint())
            && self.cluster.map_or(true, |c| c == path.cluster())
            && self.leaf.map_or(true, |l| l == leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let on_off = AttrPath::new(1, 0x0006, 0x0000).into();
        let level = AttrPath::new(1, 0x0008, 0x0000).into();

        assert!(ReportFilter::default().matches(&on_off));
        assert!(ReportFilter::cluster(0x0006).matches(&on_off));
        assert!(!ReportFilter::cluster(0x0006).matches(&level));
        assert!(ReportFilter::leaf(0x0006, 0).matches(&on_off));
        assert!(!ReportFilter::leaf(0x0006, 1).matches(&on_off));
        assert!(!ReportFilter::cluster(0x0006).on_endpoint(2).matches(&on_off));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AttrPath::new(0, 0x0028, 0x0005).to_string(),
            "ep 0/cl 0x0028/attr 0x0005"
        );
        assert_eq!(
            ReportPath::from(EventPath::new(1, 0x0045, 0)).to_string(),
            "ep 1/cl 0x0045/ev 0x0000"
        );
    }
}
