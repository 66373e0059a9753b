pub mod catchup;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod fanout;
pub mod ingest;
pub mod ingress;
pub mod mime;
pub mod object_store;
pub mod routes;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod utils;
