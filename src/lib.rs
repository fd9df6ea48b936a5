pub mod config;
pub mod enumerator;
pub mod fetcher;
pub mod ledger;
pub mod miro;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
