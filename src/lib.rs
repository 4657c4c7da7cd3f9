pub mod apps;
pub mod channel;
pub mod config;
pub mod flow;
pub mod logger;
pub mod schema;
pub mod scripts;
pub mod state;
pub mod util;
