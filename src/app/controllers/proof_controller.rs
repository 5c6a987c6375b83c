use actix_web::{get, post, web, HttpResponse};

use crate::app::errors::NodeError;
use crate::app::services::votes_aggregator::VotesAggregator;

/// Trigger proof generation for a frozen process.
#[post("/proof/{processid}")]
pub async fn post_gen_proof(
    va: web::Data<VotesAggregator>,
    path: web::Path<u64>,
) -> Result<HttpResponse, NodeError> {
    va.generate_proof(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json("proof generation started"))
}

/// Fetch the proof for a process, polling the prover if it has not been
/// stored locally yet.
#[get("/proof/{processid}")]
pub async fn get_proof(
    va: web::Data<VotesAggregator>,
    path: web::Path<u64>,
) -> Result<HttpResponse, NodeError> {
    let record = va.get_proof(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(record))
}
