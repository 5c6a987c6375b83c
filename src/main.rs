use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde_json::json;

use ovote_node::app::config::Config;
use ovote_node::app::init;
use ovote_node::app::repository::ProcessStore;
use ovote_node::app::services::census_builder::CensusBuilder;
use ovote_node::app::services::eth_client::EthRpcClient;
use ovote_node::app::services::prover_client::ProverClient;
use ovote_node::app::services::synchronizer::Synchronizer;
use ovote_node::app::services::votes_aggregator::VotesAggregator;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => panic!("invalid configuration: {}", e),
    };
    std::fs::create_dir_all(&config.dir)?;

    let census_builder = if config.census_builder {
        let cb = match CensusBuilder::new(config.dir.join("censusbuilder")) {
            Ok(cb) => cb,
            Err(e) => panic!("failed to open the census builder: {}", e),
        };
        Some(Arc::new(cb))
    } else {
        None
    };

    let votes_aggregator = if config.votes_aggregator {
        let store = match ProcessStore::open(config.dir.join("node.sqlite3")) {
            Ok(store) => store,
            Err(e) => panic!("failed to open the process store: {}", e),
        };
        if let Err(e) = store.init_meta(config.chain_id, config.start_block) {
            panic!("failed to initialize sync meta: {}", e);
        }

        let prover = match ProverClient::new(&config.prover_url, config.http_timeout) {
            Ok(prover) => prover,
            Err(e) => panic!("failed to build the prover client: {}", e),
        };
        let va = Arc::new(VotesAggregator::new(
            store.clone(),
            prover,
            config.chain_id,
            config.n_max_votes,
            config.n_levels,
        ));

        let chain = match EthRpcClient::new(
            &config.eth_url,
            &config.contract_addr,
            config.http_timeout,
        ) {
            Ok(chain) => chain,
            Err(e) => panic!("failed to build the chain client: {}", e),
        };
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::new(chain),
            store,
            config.sync_poll_interval,
        ));
        tokio::spawn(synchronizer.start());
        tokio::spawn(va.clone().sync_processes_loop(config.sweep_interval));

        Some(va)
    } else {
        None
    };

    let census_enabled = census_builder.is_some();
    let votes_enabled = votes_aggregator.is_some();
    log::info!(
        "ovote-node listening on port {} (censusBuilder={}, votesAggregator={})",
        config.port,
        census_enabled,
        votes_enabled
    );

    let port = config.port;
    HttpServer::new(move || {
        let json_config = web::JsonConfig::default().error_handler(|err, _req| {
            let message = err.to_string();
            actix_web::error::InternalError::from_response(
                err,
                HttpResponse::BadRequest().json(json!({ "message": message })),
            )
            .into()
        });

        let mut app = App::new()
            .wrap(Cors::permissive())
            .app_data(json_config);
        if let Some(cb) = &census_builder {
            app = app.app_data(web::Data::from(cb.clone()));
        }
        if let Some(va) = &votes_aggregator {
            app = app.app_data(web::Data::from(va.clone()));
        }
        app.configure(|cfg| init::initialize(cfg, census_enabled, votes_enabled))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
