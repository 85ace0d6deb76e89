pub mod meta_refinement_container;
pub mod refinement_container;
pub mod session;
