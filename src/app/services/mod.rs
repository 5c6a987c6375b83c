pub mod census;
pub mod census_builder;
pub mod eth_client;
pub mod prover_client;
pub mod synchronizer;
pub mod votes_aggregator;
