use actix_web::web;

use crate::app::routes;

/// Initialize the application routes for the enabled components.
pub fn initialize(cfg: &mut web::ServiceConfig, census_builder: bool, votes_aggregator: bool) {
    if census_builder {
        routes::census_routes(cfg);
    }
    if votes_aggregator {
        routes::votes_routes(cfg);
    }
}
