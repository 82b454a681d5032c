//! Tool Runtime (C6): a typed catalog of tools, each wrapping the Query
//! Planner + Cost Guard (C2/C3) or the Vector Index Writer's store (C5).

mod fact_store;
mod invocation;
mod tools;

pub use fact_store::{FactStore, FactStoreError, FactStoreEstimator};
pub use invocation::{InvocationRecorder, InvocationStatus, ToolInvocation};
pub use tools::{
    DryRunTool, LogAggregateTool, LogSearchTool, SimilarErrorsTool, Tool, ToolRegistry,
    ToolResult, ToolResultStatus, TraceLookupTool,
};
