pub mod types;
pub mod yaml;

pub use types::{build_flow, Command, CommandId, Condition, ElementSelector, FlowCommand};
pub use yaml::{parse_flow_content, parse_flow_file};
