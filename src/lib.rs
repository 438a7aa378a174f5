pub mod app;
pub mod config;
pub mod due;
pub mod model;
pub mod notify;
pub mod poller;
pub mod render;
pub mod scheduler;
pub mod snapshot;
pub mod tags;
pub mod taskwarrior;
pub mod web;
