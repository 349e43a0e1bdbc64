// qcc — control-flow and dataflow analysis for statement trees
//
// Library root. `cfg` builds the graph, `dataflow` annotates it, `dce`
// prunes with the results, `dot` renders it.

pub mod ast;
pub mod builder;
pub mod cfg;
pub mod dataflow;
pub mod dce;
pub mod dot;
pub mod error;
pub mod id;
