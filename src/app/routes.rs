use actix_web::web;

use crate::app::controllers::{census_controller, process_controller, proof_controller};

pub fn census_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(census_controller::post_new_census)
        .service(census_controller::get_census)
        .service(census_controller::post_add_keys)
        .service(census_controller::post_close_census)
        .service(census_controller::get_merkle_proof);
}

pub fn votes_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(process_controller::post_vote)
        .service(process_controller::get_process)
        .service(proof_controller::post_gen_proof)
        .service(proof_controller::get_proof);
}
