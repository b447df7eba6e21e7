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

//! Infrastructure for Matter certification test cases.
//!
//! - [`reporting`]: subscription handlers accumulating attribute and event reports;
//! - [`linux`]: isolated network namespaces and the Thread Border Router supervisor;
//! - [`mdns`]: mDNS interface selection and TXT record rules.

pub mod error;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod mdns;
pub mod reporting;
