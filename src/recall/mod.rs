pub mod audit;
pub mod config;
pub mod detect;
pub mod extract;
pub mod filter;
pub mod normalize;
pub mod paths;
pub mod score;
pub mod search;
pub mod source;
pub mod state;
pub mod store;
pub mod util;
pub mod warn;
