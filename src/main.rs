#[macro_use]
extern crate diesel;
use std::{sync::Arc, time::Duration};

use crate::{
    backend::SlotStore, clock::SystemClock, configuration::Configuration,
    configuration_handler::ConfigurationHandler, database_interface::DatabaseInterface,
    http::create_app, local_timeslots::LocalTimeslots, startup::bootstrap,
};
use axum::Router;
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod admin_workflow;
mod backend;
mod booking_workflow;
mod cache;
mod clock;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_timeslots;
mod notifications;
mod scheduling_engine;
mod schema;
mod shared_calendar;
mod slot_rules;
mod startup;
mod sync_gateway;
#[cfg(test)]
mod testutils;
mod types;

async fn build_app<S: SlotStore>(backend: S, configuration: &ConfigurationHandler) -> Router {
    loop {
        let clock = Arc::new(SystemClock::new(configuration.timezone()));
        match bootstrap(backend.clone(), configuration, clock).await {
            Ok(state) => break create_app(state, configuration),
            Err(err) => {
                error!(?err, "Failed to load calendar and nothing is cached. Retry in 1 sec.");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    println!("################");
    println!("# Slot Booking #");
    println!("################");

    let configuration = ConfigurationHandler::parse_arguments();

    let address = format!("0.0.0.0:{}", configuration.port());
    println!("Accessable at:\n{}", address.clone());
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, "Failed to bind {address}");
            return;
        }
    };

    let app = if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(?err, "Failed to establish database connection: {database_url}. Retry in 1 sec. You may want to restart it with database disabled (impersistent timeslots).");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        build_app(backend, &configuration).await
    } else {
        build_app(LocalTimeslots::default(), &configuration).await
    };

    if let Err(err) = axum::serve(listener, app).await {
        error!(?err, "Server stopped");
    }
}
