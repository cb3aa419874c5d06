pub mod grid;

pub use grid::TimeExpandedGrid;
