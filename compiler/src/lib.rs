// patchc — Patch graph compiler
//
// Library root. Stages run in module order: normalize, type_graph,
// time_topology, dep_graph, cycles, lower, bus_lower, link.

pub mod blocks;
pub mod bus_lower;
pub mod combine;
pub mod cycles;
pub mod dep_graph;
pub mod diag;
pub mod dot;
pub mod id;
pub mod ir;
pub mod ir_builder;
pub mod link;
pub mod lower;
pub mod normalize;
pub mod pass;
pub mod patch;
pub mod pipeline;
pub mod registry;
pub mod time_topology;
pub mod transforms;
pub mod type_graph;
pub mod type_lexer;
pub mod type_parser;
pub mod types;
pub mod writers;

#[cfg(test)]
pub(crate) mod testing;
