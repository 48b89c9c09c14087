//! Pipeline Scenario Tests
//!
//! Drives whole files through the worker and the coordinator with in-memory
//! stand-ins for every external tool.
