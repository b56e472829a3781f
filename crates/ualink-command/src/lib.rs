// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-command
//!
//! Remote command processing for the ualink gateway.
//!
//! [`CommandProcessor`] implements [`ualink_core::CommandHandler`] for the
//! five gateway commands and drives the
//! [`ConnectionManager`](ualink_opcua::ConnectionManager):
//!
//! | Command             | Effect                                  | Response           |
//! |---------------------|-----------------------------------------|--------------------|
//! | `PublishNodes`      | publish every entry                     | cropped status list |
//! | `UnpublishNodes`    | unpublish every entry                   | cropped status list |
//! | `UnpublishAllNodes` | clear the pool                          | truncated text      |
//! | `GetPublishedNodes` | none                                    | truncated JSON      |
//! | `GetInfo`           | none                                    | truncated JSON      |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod processor;
pub mod response;

pub use processor::{BatchReport, CommandProcessor, UNPUBLISH_ALL_STATUS};
pub use response::{crop_status, truncate_result, truncate_text, CROPPED_NOTICE};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
