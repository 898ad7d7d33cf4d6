pub mod controller;
pub mod error;
pub mod labels;
pub mod oci;
pub mod registry;
pub mod settings;
pub mod workload;
