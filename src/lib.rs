// Copyright 2025 the clrbindgen authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # clrbindgen
//!
//! Generates D binding modules for .NET assemblies targeting the ClrBridge native
//! runtime. The generator walks an assembly's type graph (classes, structs,
//! interfaces, enums, delegates, nested and generic types), decides how each CLR
//! construct is represented in D, and emits deterministic, compilable modules plus
//! the runtime call-thunks needed to invoke CLR members through the narrow native
//! bridge (load assembly, resolve type, resolve member, marshal arguments, invoke,
//! marshal the return value).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use clrbindgen::prelude::*;
//! use std::path::Path;
//!
//! let mut session = Session::new(
//!     Config::open(),
//!     Path::new("out"),
//!     SessionOptions::default(),
//! );
//! session.add_root("AcmeLib.dll")?;
//! session.run()?;
//! # Ok::<(), clrbindgen::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - PE container access (memory-mapped files, CLR directory, RVA math)
//! - [`metadata`] - minimal ECMA-335 front-end producing the closed descriptor model
//! - [`config`] - the line-oriented directive file controlling what is generated
//! - [`codegen`] - identifier sanitation, type mapping, and the per-kind emitters
//! - [`session`] - the assembly registry, hash-gated regeneration, and atomic
//!   publication of the output batch
//!
//! ## Failure model
//!
//! Two tiers. Fatal errors (malformed configuration, a configured type missing from
//! its assembly, namespaces colliding only by letter case, internal consistency
//! faults) abort the run before anything is published. Unsupported type shapes (open
//! generics, arrays, by-ref/pointer parameters, delegate members, virtual dispatch)
//! are documented limitations: they lower to placeholder types or skipped members
//! with a reason comment, never to silently wrong output. Runtime resolution
//! failures are the native bridge's concern and surface through its result codes
//! when generated code executes.

#[macro_use]
pub(crate) mod error;

pub mod codegen;
pub mod config;
pub mod file;
pub mod metadata;
pub mod session;

/// Convenient re-exports of the most commonly used types.
pub mod prelude {
    pub use crate::{
        config::Config,
        metadata::descriptor::{AssemblyGraph, GraphBuilder, TypeDesc, TypeKind, TypeSig},
        session::{GenState, Session, SessionOptions},
        Error, Result,
    };
}

/// `clrbindgen` Result type.
pub type Result<T> = std::result::Result<T, Error>;

/// `clrbindgen` Error type.
pub use error::Error;
