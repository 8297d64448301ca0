//! The four concrete agents (spec §4.5.1-4.5.4), each a thin wiring of
//! `capabilities::*` onto the `Agent` lifecycle contract.

pub mod scout;
pub mod tester;
pub mod transformer;
pub mod validator;

pub use scout::ScoutAgent;
pub use tester::TesterAgent;
pub use transformer::TransformerAgent;
pub use validator::ValidatorAgent;
