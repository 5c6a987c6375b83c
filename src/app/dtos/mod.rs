pub mod census_dto;
pub mod zk_inputs_dto;
