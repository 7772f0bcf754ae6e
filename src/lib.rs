pub mod driver;
pub mod mock;
pub mod parser;
pub mod runner;
pub mod utils;

// Re-export common items
pub use driver::{Driver, TreeNode};
pub use runner::{run_flow_file, Orchestra, OrchestraError};
pub use utils::OrchestraConfig;
