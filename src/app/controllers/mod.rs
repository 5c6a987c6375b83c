pub mod census_controller;
pub mod process_controller;
pub mod proof_controller;
