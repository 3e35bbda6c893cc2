pub mod controls;
pub mod non_conformites;
pub mod stats;
