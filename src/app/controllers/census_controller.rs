use actix_web::{get, post, web, HttpResponse};
use validator::Validate;

use crate::app::dtos::census_dto::{parse_public_key, CensusProofRes, NewCensusReq, NewCensusRes};
use crate::app::errors::NodeError;
use crate::app::services::census_builder::CensusBuilder;

/// Create a new census. The keys in the body are added by a background
/// task; the caller polls GET /census/{id} for progress and errors.
#[post("/census")]
pub async fn post_new_census(
    cb: web::Data<CensusBuilder>,
    req: web::Json<NewCensusReq>,
) -> Result<HttpResponse, NodeError> {
    let req = req.into_inner();
    req.validate()
        .map_err(|e| NodeError::InvalidInput(e.to_string()))?;
    let keys = req.parse()?;

    let census_id = cb.new_census()?;
    let cb = cb.into_inner();
    tokio::task::spawn_blocking(move || cb.add_public_keys_and_store_error(census_id, &keys));

    Ok(HttpResponse::Ok().json(NewCensusRes { census_id }))
}

/// Add more keys to an editable census, also asynchronously.
#[post("/census/{censusid}")]
pub async fn post_add_keys(
    cb: web::Data<CensusBuilder>,
    path: web::Path<u64>,
    req: web::Json<NewCensusReq>,
) -> Result<HttpResponse, NodeError> {
    let census_id = path.into_inner();
    let req = req.into_inner();
    req.validate()
        .map_err(|e| NodeError::InvalidInput(e.to_string()))?;
    let keys = req.parse()?;

    // fail fast on an unknown census; the add itself runs in background
    cb.census_info(census_id)?;
    let cb = cb.into_inner();
    tokio::task::spawn_blocking(move || cb.add_public_keys_and_store_error(census_id, &keys));

    Ok(HttpResponse::Ok().json(NewCensusRes { census_id }))
}

#[get("/census/{censusid}")]
pub async fn get_census(
    cb: web::Data<CensusBuilder>,
    path: web::Path<u64>,
) -> Result<HttpResponse, NodeError> {
    let info = cb.census_info(path.into_inner())?;
    Ok(HttpResponse::Ok().json(info))
}

/// Close the census and return its final root (little-endian hex).
#[post("/census/{censusid}/close")]
pub async fn post_close_census(
    cb: web::Data<CensusBuilder>,
    path: web::Path<u64>,
) -> Result<HttpResponse, NodeError> {
    let census_id = path.into_inner();
    cb.close_census(census_id)?;
    let root = cb.census_root(census_id)?;
    log::debug!("[censusID={}] closed, root: {}", census_id, hex::encode(root));
    Ok(HttpResponse::Ok().json(hex::encode(root)))
}

/// Inclusion proof for a compressed public key (hex) in a closed census.
#[get("/census/{censusid}/merkleproof/{pubkey}")]
pub async fn get_merkle_proof(
    cb: web::Data<CensusBuilder>,
    path: web::Path<(u64, String)>,
) -> Result<HttpResponse, NodeError> {
    let (census_id, pubkey_hex) = path.into_inner();
    let pk = parse_public_key(&pubkey_hex)?;
    let (index, merkle_proof) = cb.get_proof(census_id, &pk)?;
    Ok(HttpResponse::Ok().json(CensusProofRes {
        index,
        merkle_proof,
    }))
}
