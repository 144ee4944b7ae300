pub mod diagnostics;
pub mod sources;
pub mod status;
pub mod targets;
