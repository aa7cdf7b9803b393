pub mod board;
pub mod catalog;
pub mod echo;
pub mod invoker;
pub mod registry;
pub mod result;
pub mod schema;

pub use board::BoardContextTool;
pub use catalog::{format_parameters, ToolCatalog};
pub use echo::EchoTool;
pub use invoker::{DispatchPath, ToolInvoker, ToolRequest};
pub use registry::{Tool, ToolDescriptor, ToolDispatcher, ToolRegistry, ToolType};
pub use result::{classify, ToolFailure, ToolInvocationResult, ToolResultProcessor};
pub use schema::decision_schema_json;
