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

//! Accumulation of attribute and event reports pushed by live subscriptions,
//! with blocking, time-bounded wait and match primitives over them.

pub use accumulator::*;
pub use handler::*;
pub use matcher::*;
pub use path::*;
pub use report::*;
pub use transport::*;
pub use value::*;

mod accumulator;
mod handler;
mod matcher;
mod path;
mod report;
mod transport;
mod value;
