use actix_web::{get, post, web, HttpResponse};

use crate::app::entities::vote_entity::VotePackage;
use crate::app::errors::NodeError;
use crate::app::services::votes_aggregator::VotesAggregator;

/// Submit a vote package for a process in the voting phase.
#[post("/process/{processid}")]
pub async fn post_vote(
    va: web::Data<VotesAggregator>,
    path: web::Path<u64>,
    vote: web::Json<VotePackage>,
) -> Result<HttpResponse, NodeError> {
    let process_id = path.into_inner();
    va.add_vote(process_id, &vote.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::Value::Null))
}

#[get("/process/{processid}")]
pub async fn get_process(
    va: web::Data<VotesAggregator>,
    path: web::Path<u64>,
) -> Result<HttpResponse, NodeError> {
    let process = va.process_info(path.into_inner())?;
    Ok(HttpResponse::Ok().json(process))
}
