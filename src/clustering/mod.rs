pub mod consensus;
pub mod neighbour_graph;
