pub mod backoff;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod feed;
pub mod fetch;
pub mod geo;
pub mod matcher;
pub mod model;
pub mod parser;
pub mod poll;
pub mod registry;
pub mod scheduler;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
