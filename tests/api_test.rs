//! HTTP API tests over real stores backed by temporary directories.

mod common;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::json;

use ovote_node::app::init;
use ovote_node::app::merkle::check_proof;
use ovote_node::app::repository::ProcessStore;
use ovote_node::app::services::census::{index_to_key, leaf_value, Census};
use ovote_node::app::services::census_builder::CensusBuilder;
use ovote_node::app::services::prover_client::ProverClient;
use ovote_node::app::services::votes_aggregator::VotesAggregator;
use ovote_node::app::storage::MemKv;
use num_bigint::BigUint;

#[actix_web::test]
async fn test_census_lifecycle_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let cb = Arc::new(CensusBuilder::new(dir.path()).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(cb.clone()))
            .configure(|cfg| init::initialize(cfg, true, false)),
    )
    .await;

    let keys = common::random_keys(5);
    let pub_keys: Vec<String> = keys
        .iter()
        .map(|k| hex::encode(k.public().compress()))
        .collect();
    let weights: Vec<String> = vec!["1".to_string(); 5];

    // create the census; keys are added in background
    let req = test::TestRequest::post()
        .uri("/census")
        .set_json(json!({ "publicKeys": pub_keys, "weights": weights }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let census_id = body["censusId"].as_u64().unwrap();

    // poll the info endpoint until the async add lands
    let mut size = 0;
    for _ in 0..200 {
        let req = test::TestRequest::get()
            .uri(&format!("/census/{}", census_id))
            .to_request();
        let body: serde_json::Value =
            test::read_body_json(test::call_service(&app, req).await).await;
        assert!(body.get("errMsg").is_none());
        size = body["size"].as_u64().unwrap();
        if size == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(size, 5);

    // close it and get the root back
    let req = test::TestRequest::post()
        .uri(&format!("/census/{}/close", census_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let root_hex: String = test::read_body_json(resp).await;
    let root: [u8; 32] = hex::decode(&root_hex).unwrap().try_into().unwrap();

    // a member proof verifies against the returned root
    let req = test::TestRequest::get()
        .uri(&format!(
            "/census/{}/merkleproof/{}",
            census_id,
            hex::encode(keys[0].public().compress())
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let index = body["index"].as_u64().unwrap();
    let proof = hex::decode(body["merkleProof"].as_str().unwrap()).unwrap();
    let leaf = leaf_value(&keys[0].public(), &BigUint::from(1u8));
    assert!(check_proof(&root, &proof, &index_to_key(index), &leaf).unwrap());

    // closing twice is a 400 with the error message shape
    let req = test::TestRequest::post()
        .uri(&format!("/census/{}/close", census_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("already closed"));
}

#[actix_web::test]
async fn test_census_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let cb = Arc::new(CensusBuilder::new(dir.path()).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(cb))
            .configure(|cfg| init::initialize(cfg, true, false)),
    )
    .await;

    // unknown census
    let req = test::TestRequest::get().uri("/census/99").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // malformed public key hex
    let req = test::TestRequest::post()
        .uri("/census")
        .set_json(json!({ "publicKeys": ["zzzz"], "weights": ["1"] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // mismatched lengths
    let req = test::TestRequest::post()
        .uri("/census")
        .set_json(json!({ "publicKeys": [hex::encode([0u8; 32])], "weights": ["1", "2"] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().is_some());
}

#[actix_web::test]
async fn test_vote_and_process_over_http() {
    const CHAIN_ID: u64 = 3;
    const PROCESS_ID: u64 = 7;

    let dir = tempfile::tempdir().unwrap();
    let store = ProcessStore::open(dir.path().join("node.sqlite3")).unwrap();
    store.init_meta(CHAIN_ID, 0).unwrap();

    let census = Census::new(Arc::new(MemKv::new())).unwrap();
    let keys = common::random_keys(4);
    census
        .add_public_keys(&common::members_with_weight(&keys, 1))
        .unwrap();
    census.close().unwrap();
    let root = census.root().unwrap();
    store
        .store_process(PROCESS_ID, &root, 4, 1, 1000, 10, 0, 50, 1)
        .unwrap();

    let prover = ProverClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
    let va = Arc::new(VotesAggregator::new(
        store.clone(),
        prover,
        CHAIN_ID,
        8,
        4,
    ));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(va))
            .configure(|cfg| init::initialize(cfg, false, true)),
    )
    .await;

    // the process is served as JSON with its numeric status
    let req = test::TestRequest::get()
        .uri(&format!("/process/{}", PROCESS_ID))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["id"].as_u64().unwrap(), PROCESS_ID);
    assert_eq!(body["status"].as_u64().unwrap(), 0);
    assert_eq!(body["censusRoot"].as_str().unwrap(), hex::encode(root));

    // vote admission over HTTP
    let vote = common::build_vote(&census, &keys[0], CHAIN_ID, PROCESS_ID, 1, 1);
    let req = test::TestRequest::post()
        .uri(&format!("/process/{}", PROCESS_ID))
        .set_json(&vote)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // double vote rejected with the error message shape
    let req = test::TestRequest::post()
        .uri(&format!("/process/{}", PROCESS_ID))
        .set_json(&vote)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("already exists"));

    // no proof has been generated yet
    let req = test::TestRequest::get()
        .uri(&format!("/proof/{}", PROCESS_ID))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // proof generation refused before the results-publishing block
    let req = test::TestRequest::post()
        .uri(&format!("/proof/{}", PROCESS_ID))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("block"));
}
