pub mod algorithms;
pub mod checkpoint;
pub mod combination;
pub mod containers;
pub mod errors;
pub mod grid;
pub mod objects;
pub mod refinement;
pub mod utilities;
