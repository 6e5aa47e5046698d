pub mod config;
pub mod ensemble;
pub mod env_state;
pub mod filelist;
pub mod grid;
pub mod histogram;
pub mod jobs;
pub mod output;
pub mod particles;
pub mod physics;
pub mod plotting;
pub mod quantity;
pub mod snapshot;
