pub mod adaptive;
pub mod integration;
pub mod refinement;
