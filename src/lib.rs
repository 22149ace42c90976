pub mod api;
pub mod asset_stats;
pub mod background_processor;
pub mod config;
pub mod database;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod reconcile;
pub mod requester;
pub mod sheet_parser;
pub mod storage;
pub mod task_queue;
pub mod throttle;
pub mod validation;
