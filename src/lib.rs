//! Zentinel Mock API
//!
//! A programmable mock API server that stores whatever clients send under
//! configured path sections and serves it back, simulating a backend for
//! tests and demos.
//!
//! # Features
//!
//! - **Sections**: Map path patterns to identifier extraction and storage rules
//! - **Multi-key resources**: Address one resource by several identifiers
//! - **Identifier extraction**: From the path, a header, JSONPath or XML paths
//! - **Strict paths**: Scope identifier uniqueness to a single resource path
//! - **Scenarios**: Scripted responses that take precedence over stored data
//!
//! # Example Configuration
//!
//! ```yaml
//! sections:
//!   users:
//!     path_pattern: /api/users/*
//!     body_id_paths: ["$.id"]
//! scenarios:
//!   - request_path: GET /api/users/broken
//!     status_code: 500
//!     data: '{"error": "boom"}'
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod identifier;
pub mod matcher;
pub mod metrics;
pub mod scenario;
pub mod store;

pub use api::{ApiRequest, ApiResponse, MockApi};
pub use config::MockApiConfig;
pub use error::{Error, ErrorKind};
pub use scenario::ScenarioStore;
pub use store::ResourceStore;
