//! Configuration resolution for flowrunner.
//!
//! Turns a templated configuration file plus a set of variables into one of
//! the two typed records of `flowrunner-core`.
//!
//! ```text
//! ┌──────────────┐   handlebars    ┌──────────────────────┐
//! │ cluster.json │ ──────────────► │ {"schema": "iglu:…", │
//! │  {{vars}}    │   (strict)      │  "data": {…}}        │
//! └──────────────┘                 └──────────┬───────────┘
//!                                             │ schema check + serde
//!                                             ▼
//!                                  ┌──────────────────────┐
//!                                  │ ClusterConfig /      │
//!                                  │ PlaybookConfig       │
//!                                  └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use flowrunner_config::{parse_vars, ConfigResolver};
//!
//! let vars = parse_vars("env,prod,bucket,my-logs").unwrap();
//! let resolver = ConfigResolver::new();
//! let cluster = resolver
//!     .resolve_cluster("config/cluster.json".as_ref(), &vars)
//!     .unwrap();
//! println!("launching {}", cluster.name);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod resolver;
pub mod vars;

pub use error::{ConfigError, Result};
pub use resolver::{ConfigResolver, RecordKind};
pub use vars::parse_vars;
